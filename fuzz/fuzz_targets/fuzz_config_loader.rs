#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // TOML parsing of Config must reject invalid input gracefully,
    // never panic. Parse errors and validation errors are both fine.
    match ams_config::load_toml(data) {
        Ok(cfg) => {
            let _ = cfg.validate();
        }
        Err(_e) => {}
    }
});
