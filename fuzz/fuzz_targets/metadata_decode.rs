#![no_main]

use libfuzzer_sys::fuzz_target;

use httpcache_disk::cache::codec;

fuzz_target!(|data: &[u8]| {
    if let Ok(record) = codec::decode(data) {
        let reencoded = codec::encode(&record);
        let decoded = codec::decode(&reencoded).expect("re-encoded record must decode");
        assert_eq!(decoded, record);
    }
});
