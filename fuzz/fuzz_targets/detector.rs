#![no_main]

use callmap::detector::ProtocolDetector;
use callmap::export::escape_puml;
use callmap::Local;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let value = text.as_ref();

    // Detection and escaping must not panic on any input
    let locals = [Local::new("value", &value)];
    let _ = ProtocolDetector::default().detect(&locals);
    let _ = escape_puml(value);
});
