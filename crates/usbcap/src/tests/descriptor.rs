use crate::descriptor::{string_indexes, ConfigBlob, DeviceDescriptor, StringEntry};

fn config_header(total: u16, i_configuration: u8) -> Vec<u8> {
    let [lo, hi] = total.to_le_bytes();
    vec![9, 2, lo, hi, 1, 1, i_configuration, 0x80, 50]
}

fn interface9(i_interface: u8) -> Vec<u8> {
    vec![9, 4, 0, 0, 1, 0xff, 0, 0, i_interface]
}

fn interface11(i_interface: u8) -> Vec<u8> {
    // extended form with a trailing wNumClasses
    vec![11, 4, 0, 0, 1, 0xff, 0, 0, i_interface, 2, 0]
}

fn endpoint() -> Vec<u8> {
    vec![7, 5, 0x81, 3, 8, 0, 10]
}

#[test]
fn config_blob_exposes_exactly_the_reported_bytes() {
    let mut chain = config_header(32, 0);
    chain.extend(interface9(0));
    chain.extend(endpoint());
    chain.extend(endpoint());
    assert_eq!(chain.len(), 32);

    let blob = ConfigBlob::from_descriptor_bytes(chain);
    assert_eq!(blob.total_length(), 32);
    assert_eq!(blob.descriptor_bytes().len(), 32);
}

#[test]
fn config_blob_strips_the_request_header() {
    let mut buf = vec![0u8; 12];
    buf.extend(config_header(9, 0));
    let blob = ConfigBlob::from_request(buf, 12);
    assert_eq!(blob.descriptor_bytes().len(), 9);
    assert_eq!(blob.total_length(), 9);
}

#[test]
fn string_indexes_walks_configuration_and_interfaces() {
    let mut chain = config_header(0, 4);
    chain.extend(interface9(5));
    chain.extend(vec![5, 0x30, 0, 0, 0]); // unknown descriptor type, skipped
    chain.extend(interface11(6));
    chain.extend(endpoint());
    let total = chain.len() as u16;
    chain[2..4].copy_from_slice(&total.to_le_bytes());

    assert_eq!(string_indexes(&chain), vec![4, 5, 6]);
}

#[test]
fn string_indexes_ignores_zero_indexes() {
    let mut chain = config_header(0, 0);
    chain.extend(interface9(0));
    let total = chain.len() as u16;
    chain[2..4].copy_from_slice(&total.to_le_bytes());

    assert!(string_indexes(&chain).is_empty());
}

#[test]
fn string_indexes_stops_at_an_overrunning_descriptor() {
    let mut chain = config_header(0, 4);
    chain.extend(vec![25, 4, 0]); // bLength overruns the chain
    let total = chain.len() as u16;
    chain[2..4].copy_from_slice(&total.to_le_bytes());

    assert_eq!(string_indexes(&chain), vec![4]);
}

#[test]
fn string_indexes_stops_at_a_zero_length_descriptor() {
    let mut chain = config_header(0, 4);
    chain.extend(vec![0, 0, 0, 0]);
    let total = chain.len() as u16;
    chain[2..4].copy_from_slice(&total.to_le_bytes());

    assert_eq!(string_indexes(&chain), vec![4]);
}

#[test]
fn device_descriptor_parses_the_wire_form() {
    let raw = [
        18, 1, // bLength, bDescriptorType
        0x00, 0x02, // bcdUSB 2.0
        0, 0, 0, // class triple
        64, // bMaxPacketSize0
        0x5e, 0x04, // idVendor
        0x8e, 0x02, // idProduct
        0x14, 0x01, // bcdDevice
        1, 2, 3, // iManufacturer, iProduct, iSerialNumber
        1, // bNumConfigurations
    ];
    let desc = DeviceDescriptor::parse(&raw).unwrap();
    assert_eq!(desc.usb_version, 0x0200);
    assert_eq!(desc.vendor_id, 0x045e);
    assert_eq!(desc.product_id, 0x028e);
    assert_eq!(desc.device_rev, 0x0114);
    assert_eq!(desc.max_packet_size0, 64);
    assert_eq!(desc.i_manufacturer, 1);
    assert_eq!(desc.i_product, 2);
    assert_eq!(desc.i_serial, 3);
    assert_eq!(desc.num_configurations, 1);

    assert!(DeviceDescriptor::parse(&raw[..17]).is_none());
}

#[test]
fn string_entry_decodes_utf16() {
    let entry = StringEntry {
        index: 2,
        lang: 0x0409,
        data: "Gamepad".encode_utf16().flat_map(u16::to_le_bytes).collect(),
    };
    assert_eq!(entry.text(), "Gamepad");

    // languages are raw u16 pairs, not text
    let langs = StringEntry { index: 0, lang: 0, data: vec![0x09, 0x04, 0x11, 0x04] };
    assert_eq!(langs.lang_ids(), vec![0x0409, 0x0411]);

    // text stops at an embedded NUL
    let nul = StringEntry { index: 1, lang: 0, data: vec![b'a', 0, 0, 0, b'b', 0] };
    assert_eq!(nul.text(), "a");
}
