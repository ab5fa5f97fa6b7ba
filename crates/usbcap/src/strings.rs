//! String descriptor collection.

use crate::descriptor::{string_indexes, ConfigBlob, DeviceDescriptor, StringEntry};
use crate::topology::Hub;
use tracing::debug;

/// Fetch every string descriptor referenced by a device, once per supported
/// language.
///
/// Index 0 (the language-id array) is fetched first; when a device has no
/// string support at all that fetch fails and the collection is empty, which
/// is fine — strings are optional. Individual string failures are skipped.
pub(crate) fn collect<H: Hub>(
    hub: &H,
    port: u32,
    desc: &DeviceDescriptor,
    cfg: &ConfigBlob,
) -> Vec<StringEntry> {
    let languages = match hub.string_descriptor(port, 0, 0) {
        Ok(entry) => entry.lang_ids(),
        Err(error) => {
            debug!(port, %error, "no language-id descriptor");
            return Vec::new();
        }
    };

    let mut indexes: Vec<u8> = [desc.i_manufacturer, desc.i_product, desc.i_serial]
        .into_iter()
        .filter(|index| *index != 0)
        .collect();
    indexes.extend(string_indexes(cfg.descriptor_bytes()));

    let mut collected = Vec::new();
    for index in indexes {
        for &lang in &languages {
            match hub.string_descriptor(port, index, lang) {
                Ok(entry) => collected.push(entry),
                Err(error) => debug!(port, index, lang, %error, "string fetch failed"),
            }
        }
    }
    collected
}
