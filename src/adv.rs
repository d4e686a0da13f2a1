//! Advertising/EIR structure parsing: just enough to extract the fields the
//! peer cache stores once discovered (local name, appearance).

use crate::consts::ResponseDataType;

/// Walks a sequence of `[CSS] Part A` length-type-value structures and
/// extracts the local name (preferring Complete over Shortened) and
/// appearance, if present. Malformed trailing data is ignored rather than
/// rejecting the whole buffer: advertising data from uncooperative peers is
/// common in the wild.
pub(crate) fn parse_name_and_appearance(data: &[u8]) -> (Option<String>, Option<u16>) {
    let mut name = None;
    let mut appearance = None;
    let mut i = 0;
    while i < data.len() {
        let len = usize::from(data[i]);
        if len == 0 || i + 1 + len > data.len() {
            break;
        }
        let typ = data[i + 1];
        let value = &data[i + 2..i + 1 + len];
        match ResponseDataType::try_from(typ) {
            Ok(ResponseDataType::CompleteLocalName) => {
                name = Some(String::from_utf8_lossy(value).into_owned());
            }
            Ok(ResponseDataType::ShortLocalName) if name.is_none() => {
                name = Some(String::from_utf8_lossy(value).into_owned());
            }
            Ok(ResponseDataType::Appearance) if value.len() == 2 => {
                appearance = Some(u16::from_le_bytes([value[0], value[1]]));
            }
            _ => {}
        }
        i += 1 + len;
    }
    (name, appearance)
}
