#![no_main]
use libfuzzer_sys::fuzz_target;
use trolley::Controller;
use trolley::config::Config;
use trolley::persistence::ResumeSnapshot;
use trolley::settings::DeviceSettings;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let mut ctl = Controller::new(
        &Config::default(),
        DeviceSettings::default(),
        ResumeSnapshot::cleared(),
    );
    let _ = ctl.handle_param(&text);
    let _ = ctl.handle_admin(&text);
    // Refused values never reach the stored settings
    assert!(ctl.settings().validate().is_ok());
});
