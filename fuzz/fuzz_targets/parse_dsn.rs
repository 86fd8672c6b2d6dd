//! Fuzz target for DSN parsing and host splitting.
//!
//! Parsing arbitrary text must never panic, and a parsed DSN must split
//! into one single-host DSN per listed host.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pgcluster_client::{Dsn, split_by_host};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(dsn) = Dsn::parse(text) else {
        return;
    };

    let _ = dsn.masked();
    let _ = dsn.to_string();

    let hosts = split_by_host(&dsn);
    assert_eq!(hosts.len(), dsn.hosts().len().max(1));
    for (single, host) in hosts.iter().zip(dsn.hosts()) {
        assert_eq!(single.hosts(), std::slice::from_ref(host));
        assert!(single.host_id().starts_with(host.as_str()));
    }
});
