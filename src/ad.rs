//! Walking the AD structures of an advertising payload.
//!
//! Each structure is `len, type, value[len - 1]`. Unrecognized types and
//! structures whose length runs past the payload are skipped without
//! aborting the walk.

use std::fmt;

pub const AD_TYPE_UUID16_INCOMPLETE: u8 = 0x02;
pub const AD_TYPE_UUID16_COMPLETE: u8 = 0x03;
pub const AD_TYPE_UUID128: u8 = 0x06;
pub const AD_TYPE_SHORTENED_NAME: u8 = 0x08;
pub const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
pub const AD_TYPE_SERVICE_DATA_UUID16: u8 = 0x16;
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// Service data shorter than this (length byte, type and UUID) carries no payload.
const MIN_SERVICE_DATA_SIZE: usize = 5;

/// A raw AD structure including its length and type bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct AdElement(Vec<u8>);

impl AdElement {
    /// Wrap raw structure bytes. Returns `None` unless the length byte matches.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.first() {
            Some(&len) if len >= 1 && usize::from(len) + 1 == bytes.len() => {
                Some(Self(bytes.to_vec()))
            }
            _ => None,
        }
    }

    /// Encode a structure from its type and value. `None` if the value does not fit.
    pub fn encode(ad_type: u8, value: &[u8]) -> Option<Self> {
        let len = u8::try_from(value.len() + 1).ok()?;
        let mut bytes = Vec::with_capacity(value.len() + 2);
        bytes.push(len);
        bytes.push(ad_type);
        bytes.extend_from_slice(value);
        Some(Self(bytes))
    }

    pub fn ad_type(&self) -> u8 {
        self.0[1]
    }

    /// The bytes following the type byte.
    pub fn value(&self) -> &[u8] {
        &self.0[2..]
    }

    /// The whole structure, length byte first.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Little-endian 16-bit id following the type byte: the service UUID of
    /// service data or the company id of manufacturer data.
    pub fn uuid16(&self) -> Option<u16> {
        match self.0.get(2..4) {
            Some(&[lo, hi]) => Some(u16::from_le_bytes([lo, hi])),
            _ => None,
        }
    }
}

impl fmt::Debug for AdElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// A recognized AD structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdStructure {
    /// 16-bit service class UUID (first entry of the list, read big-endian).
    ServiceUuid16(u16),
    ServiceUuid128(Vec<u8>),
    ShortenedLocalName(String),
    CompleteLocalName(String),
    ServiceData(AdElement),
    ManufacturerData(AdElement),
}

/// Classify one in-bounds structure. `element` includes the length byte.
fn classify(element: &[u8]) -> Option<AdStructure> {
    let ad_type = *element.get(1)?;
    match ad_type {
        AD_TYPE_UUID16_INCOMPLETE | AD_TYPE_UUID16_COMPLETE => match element.get(2..4)? {
            &[hi, lo] => Some(AdStructure::ServiceUuid16(u16::from_be_bytes([hi, lo]))),
            _ => None,
        },
        AD_TYPE_UUID128 => Some(AdStructure::ServiceUuid128(element[2..].to_vec())),
        AD_TYPE_SHORTENED_NAME => Some(AdStructure::ShortenedLocalName(decode_name(
            &element[2..],
        ))),
        AD_TYPE_COMPLETE_NAME => Some(AdStructure::CompleteLocalName(decode_name(&element[2..]))),
        AD_TYPE_SERVICE_DATA_UUID16 if element.len() >= MIN_SERVICE_DATA_SIZE => {
            AdElement::from_bytes(element).map(AdStructure::ServiceData)
        }
        AD_TYPE_MANUFACTURER_DATA => {
            AdElement::from_bytes(element).map(AdStructure::ManufacturerData)
        }
        _ => None,
    }
}

/// Names that are not valid UTF-8 become empty.
fn decode_name(bytes: &[u8]) -> String {
    std::str::from_utf8(bytes).map(str::to_owned).unwrap_or_default()
}

/// Walk an AD payload and collect every recognized structure in order.
pub fn walk(payload: &[u8]) -> Vec<AdStructure> {
    let mut structures = Vec::new();
    let mut offset = 0;
    let mut remaining = payload.len();

    while remaining > 1 {
        // Always at least 1, so the walk terminates.
        let size = usize::from(payload[offset]) + 1;
        if size > 1
            && size <= remaining
            && let Some(structure) = classify(&payload[offset..offset + size])
        {
            structures.push(structure);
        }
        offset += size;
        remaining = remaining.saturating_sub(size);
    }

    structures
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(ad_type: u8, value: &[u8]) -> Vec<u8> {
        AdElement::encode(ad_type, value).unwrap().as_bytes().to_vec()
    }

    #[test]
    fn test_walk_names_and_uuids() {
        let mut payload = element(0x01, &[0x06]);
        payload.extend(element(AD_TYPE_UUID16_COMPLETE, &[0xD2, 0xFC]));
        payload.extend(element(AD_TYPE_COMPLETE_NAME, b"sensor"));

        assert_eq!(
            walk(&payload),
            vec![
                AdStructure::ServiceUuid16(0xD2FC),
                AdStructure::CompleteLocalName("sensor".into()),
            ]
        );
    }

    #[test]
    fn test_walk_service_and_manufacturer_data() {
        let mut payload = element(AD_TYPE_SERVICE_DATA_UUID16, &[0xD2, 0xFC, 0x40, 0x01, 0x64]);
        payload.extend(element(AD_TYPE_MANUFACTURER_DATA, &[0x99, 0x04, 0x05]));

        let structures = walk(&payload);
        assert_eq!(structures.len(), 2);
        match &structures[0] {
            AdStructure::ServiceData(e) => {
                assert_eq!(e.uuid16(), Some(0xFCD2));
                assert_eq!(e.as_bytes(), &payload[..7]);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &structures[1] {
            AdStructure::ManufacturerData(e) => assert_eq!(e.uuid16(), Some(0x0499)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_service_data_without_payload_is_ignored() {
        let payload = element(AD_TYPE_SERVICE_DATA_UUID16, &[0xD2, 0xFC]);
        assert!(walk(&payload).is_empty());
    }

    #[test]
    fn test_invalid_utf8_name_is_empty() {
        let payload = element(AD_TYPE_SHORTENED_NAME, &[0xFF, 0xFE]);
        assert_eq!(
            walk(&payload),
            vec![AdStructure::ShortenedLocalName(String::new())]
        );
    }

    #[test]
    fn test_unknown_type_between_known_elements() {
        let first = element(AD_TYPE_SHORTENED_NAME, b"abc");
        let unknown = element(0x0A, &[0x04]);
        let last = element(AD_TYPE_UUID16_INCOMPLETE, &[0x18, 0x1C]);

        let mut plain = first.clone();
        plain.extend(&last);
        let mut with_unknown = first;
        with_unknown.extend(&unknown);
        with_unknown.extend(&last);

        assert_eq!(walk(&plain), walk(&with_unknown));
        assert_eq!(walk(&with_unknown).len(), 2);
    }

    #[test]
    fn test_oversized_element_is_skipped() {
        // Declares 10 bytes but only 3 remain.
        let mut payload = element(AD_TYPE_COMPLETE_NAME, b"ok");
        payload.extend([0x09, AD_TYPE_COMPLETE_NAME, b'x']);
        assert_eq!(walk(&payload), vec![AdStructure::CompleteLocalName("ok".into())]);
    }

    #[test]
    fn test_zero_length_elements_terminate() {
        assert!(walk(&[0x00; 32]).is_empty());
        assert_eq!(walk(&[0x00, 0x00, 0x02, 0xFF, 0x01]).len(), 1);
    }

    #[test]
    fn test_truncated_uuid16_is_ignored() {
        assert!(walk(&element(AD_TYPE_UUID16_COMPLETE, &[0xD2])).is_empty());
    }

    #[test]
    fn test_trailing_single_byte_is_ignored() {
        let mut payload = element(AD_TYPE_COMPLETE_NAME, b"n");
        payload.push(0x05);
        assert_eq!(walk(&payload), vec![AdStructure::CompleteLocalName("n".into())]);
    }

    #[test]
    fn test_element_from_bytes_checks_length() {
        assert!(AdElement::from_bytes(&[0x02, 0xFF, 0x01]).is_some());
        assert!(AdElement::from_bytes(&[0x03, 0xFF, 0x01]).is_none());
        assert!(AdElement::from_bytes(&[0x00]).is_none());
        assert!(AdElement::from_bytes(&[]).is_none());
    }
}
