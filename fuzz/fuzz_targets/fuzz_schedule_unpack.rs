#![no_main]
use libfuzzer_sys::fuzz_target;
use trolley::schedule::ScheduleBitmask;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data)
        && let Ok(mask) = ScheduleBitmask::unpack(text)
    {
        // Anything accepted must pack back to a loadable form
        let again = ScheduleBitmask::unpack(&mask.pack());
        assert_eq!(again.ok(), Some(mask));
    }
});
