use crate::device::{serial_hash, DeviceState};
use num_traits::FromPrimitive;

#[test]
fn serial_hash_is_deterministic() {
    assert_eq!(serial_hash("0123-ABC"), serial_hash("0123-ABC"));
    assert_ne!(serial_hash("0123-ABC"), serial_hash("0123-ABD"));
    // empty serials still hash to the seed, only absent serials are 0
    assert_eq!(serial_hash(""), 8191);
}

#[test]
fn device_state_wire_values() {
    assert_eq!(DeviceState::from_u32(1), Some(DeviceState::UsedByHost));
    assert_eq!(DeviceState::from_u32(2), Some(DeviceState::UsedByHostCapturable));
    assert_eq!(DeviceState::from_u32(3), Some(DeviceState::Unused));
    assert_eq!(DeviceState::from_u32(4), Some(DeviceState::HeldByProxy));
    assert_eq!(DeviceState::from_u32(5), Some(DeviceState::UsedByGuest));
    assert_eq!(DeviceState::from_u32(0), None);
    assert_eq!(DeviceState::from_u32(6), None);
}
