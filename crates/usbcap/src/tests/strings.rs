use crate::descriptor::{ConfigBlob, DeviceDescriptor, StringEntry};
use crate::device::serial_hash;
use crate::error::FetchError;
use crate::strings::collect;
use crate::topology::{populate, MockHub};

fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn plain_config() -> ConfigBlob {
    ConfigBlob::from_descriptor_bytes(vec![9, 2, 9, 0, 1, 1, 0, 0x80, 50])
}

#[test]
fn collects_every_index_in_every_language() {
    let mut hub = MockHub::new();
    // language-id descriptor: english, japanese
    hub.expect_string_descriptor()
        .withf(|_, index, lang| *index == 0 && *lang == 0)
        .times(1)
        .returning(|_, _, _| {
            Ok(StringEntry { index: 0, lang: 0, data: vec![0x09, 0x04, 0x11, 0x04] })
        });
    // three referenced indexes, fetched once per language
    hub.expect_string_descriptor()
        .withf(|_, index, _| *index != 0)
        .times(6)
        .returning(|_, index, lang| {
            Ok(StringEntry { index, lang, data: utf16le(&format!("s{index}-{lang:04x}")) })
        });

    let desc =
        DeviceDescriptor { i_manufacturer: 1, i_product: 2, i_serial: 3, ..Default::default() };
    let collected = collect(&hub, 1, &desc, &plain_config());
    assert_eq!(collected.len(), 6);

    // the first language reported by the device wins
    let dev = populate(&desc, 1, "KEY", "Hub", &collected);
    assert_eq!(dev.manufacturer.as_deref(), Some("s1-0409"));
    assert_eq!(dev.product.as_deref(), Some("s2-0409"));
    assert_eq!(dev.serial.as_deref(), Some("s3-0409"));
    assert_eq!(dev.serial_hash, serial_hash("s3-0409"));
}

#[test]
fn missing_language_descriptor_yields_no_strings() {
    let mut hub = MockHub::new();
    hub.expect_string_descriptor()
        .times(1)
        .returning(|_, _, _| Err(FetchError::Malformed("no string support")));

    let desc = DeviceDescriptor { i_manufacturer: 1, ..Default::default() };
    assert!(collect(&hub, 1, &desc, &plain_config()).is_empty());
}

#[test]
fn devices_without_string_indexes_fetch_only_the_languages() {
    let mut hub = MockHub::new();
    hub.expect_string_descriptor()
        .withf(|_, index, lang| *index == 0 && *lang == 0)
        .times(1)
        .returning(|_, _, _| {
            Ok(StringEntry { index: 0, lang: 0, data: vec![0x09, 0x04] })
        });

    let desc = DeviceDescriptor::default();
    assert!(collect(&hub, 1, &desc, &plain_config()).is_empty());
}

#[test]
fn populate_without_strings_leaves_optionals_empty() {
    let desc =
        DeviceDescriptor { i_manufacturer: 1, i_product: 2, i_serial: 3, ..Default::default() };
    let dev = populate(&desc, 4, "", "Hub", &[]);
    assert_eq!(dev.manufacturer, None);
    assert_eq!(dev.serial, None);
    assert_eq!(dev.serial_hash, 0);
    // no driver key means the host never bound a driver at all
    assert_eq!(dev.state, crate::device::DeviceState::Unused);
}
