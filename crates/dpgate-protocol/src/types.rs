//! Core data-point types.
//!
//! Everything in this module either travels on the wire ([`DataPointFrame`])
//! or is the typed result of reading the wire ([`DecodedValue`]). The
//! identity newtypes name the parties involved: the physical node that
//! owns the radio, the logical channel (one gang) inside it, and the
//! numeric DP a channel reads and writes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identity of a physical node on the mesh network.
///
/// Newtype over the node's 64-bit network address so it can never be
/// confused with a DP number or a gang index. `#[serde(transparent)]`
/// keeps it a plain number in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N-{:04x}", self.0)
    }
}

/// A vendor data-point identifier.
///
/// The vendor protocol encodes DP ids in a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DpId(pub u8);

impl fmt::Display for DpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dp{}", self.0)
    }
}

/// Identity of one logical channel: a gang on a physical node.
///
/// Gangs are numbered from 1. Gang 1 is the *main* channel: it owns the
/// configuration DPs shared by the whole device (power-on behavior,
/// backlight) and answers for its siblings during a rejoin sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId {
    /// The physical node this channel lives on.
    pub node: NodeId,
    /// 1-based gang number.
    pub gang: u8,
}

impl ChannelId {
    /// Gang number of the main channel.
    pub const MAIN_GANG: u8 = 1;

    /// Creates a channel id for `gang` on `node`.
    pub fn new(node: NodeId, gang: u8) -> Self {
        Self { node, gang }
    }

    /// The main channel (gang 1) of `node`.
    pub fn main(node: NodeId) -> Self {
        Self::new(node, Self::MAIN_GANG)
    }

    /// Returns `true` for gang 1.
    pub fn is_main(&self) -> bool {
        self.gang == Self::MAIN_GANG
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/g{}", self.node, self.gang)
    }
}

// ---------------------------------------------------------------------------
// Datatype
// ---------------------------------------------------------------------------

/// The datatype tag carried by every DP record.
///
/// The discriminants are the vendor's wire tags, so `as u8` gives the
/// byte that goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Datatype {
    /// Opaque bytes, passed through untouched.
    Raw = 0x00,
    /// One byte, 0 or 1.
    Bool = 0x01,
    /// Unsigned integer, big-endian, 4 bytes on write.
    Value = 0x02,
    /// One character per byte.
    String = 0x03,
    /// One byte selecting an enumerant.
    Enum = 0x04,
    /// Unsigned bit field, big-endian, 1/2/4 bytes.
    Bitmap = 0x05,
}

impl Datatype {
    /// The wire tag for this datatype.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Maps a wire tag back to a datatype. `None` for unknown tags.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(Self::Raw),
            0x01 => Some(Self::Bool),
            0x02 => Some(Self::Value),
            0x03 => Some(Self::String),
            0x04 => Some(Self::Enum),
            0x05 => Some(Self::Bitmap),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Datatype {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Self::from_tag(tag).ok_or(ProtocolError::UnknownDatatype(tag))
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Raw => "raw",
            Self::Bool => "bool",
            Self::Value => "value",
            Self::String => "string",
            Self::Enum => "enum",
            Self::Bitmap => "bitmap",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// DataPointFrame
// ---------------------------------------------------------------------------

/// One DP record as it travels on the wire.
///
/// The datatype is kept as the raw tag rather than a [`Datatype`]: frames
/// from the device may carry tags this adapter does not understand, and
/// those must be representable so the router can log and drop them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPointFrame {
    /// Which data point this record addresses.
    pub dp: DpId,
    /// Raw datatype tag (see [`Datatype`]).
    pub tag: u8,
    /// Payload bytes, exactly as received or about to be sent.
    pub payload: Vec<u8>,
}

impl DataPointFrame {
    /// Payload the device family interprets as "report your current value".
    pub const READ_REQUEST_PAYLOAD: [u8; 1] = [0x00];

    /// Builds a frame with a known datatype.
    pub fn new(dp: DpId, datatype: Datatype, payload: Vec<u8>) -> Self {
        Self {
            dp,
            tag: datatype.tag(),
            payload,
        }
    }

    /// Builds the read-request frame for `dp`.
    ///
    /// This protocol family has no explicit read command: a raw write
    /// carrying a single zero byte makes the device answer with a
    /// `response` for that DP.
    pub fn read_request(dp: DpId) -> Self {
        Self::new(dp, Datatype::Raw, Self::READ_REQUEST_PAYLOAD.to_vec())
    }

    /// Returns `true` if this frame is a read request.
    pub fn is_read_request(&self) -> bool {
        self.tag == Datatype::Raw.tag() && self.payload == Self::READ_REQUEST_PAYLOAD
    }

    /// The datatype, if the tag is one we know.
    pub fn datatype(&self) -> Option<Datatype> {
        Datatype::from_tag(self.tag)
    }
}

// ---------------------------------------------------------------------------
// DecodedValue
// ---------------------------------------------------------------------------

/// A typed DP value, tagged by the datatype it was decoded from.
///
/// `Value` and `Bitmap` both hold integers but stay distinct variants so
/// that a decoded value always knows how to encode itself again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum DecodedValue {
    Raw(Vec<u8>),
    Bool(bool),
    Value(u64),
    String(String),
    Enum(u8),
    Bitmap(u64),
}

impl DecodedValue {
    /// The datatype this value belongs to.
    pub fn datatype(&self) -> Datatype {
        match self {
            Self::Raw(_) => Datatype::Raw,
            Self::Bool(_) => Datatype::Bool,
            Self::Value(_) => Datatype::Value,
            Self::String(_) => Datatype::String,
            Self::Enum(_) => Datatype::Enum,
            Self::Bitmap(_) => Datatype::Bitmap,
        }
    }

    /// Reads the value as an on/off state.
    ///
    /// Some firmware reports switch state as an integer 0/1 instead of a
    /// bool record, so integers 0 and 1 are accepted too.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Value(0) | Self::Enum(0) => Some(false),
            Self::Value(1) | Self::Enum(1) => Some(true),
            _ => None,
        }
    }

    /// Reads the value as an unsigned integer (`Value`, `Enum`, `Bitmap`).
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Value(v) | Self::Bitmap(v) => Some(*v),
            Self::Enum(e) => Some(u64::from(*e)),
            _ => None,
        }
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw(bytes) => {
                f.write_str("0x")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Self::Bool(b) => write!(f, "{b}"),
            Self::Value(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Enum(e) => write!(f, "enum({e})"),
            Self::Bitmap(v) => write!(f, "0b{v:b}"),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&NodeId(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_channel_id_display_includes_node_and_gang() {
        let id = ChannelId::new(NodeId(0x1a2b), 3);
        assert_eq!(id.to_string(), "N-1a2b/g3");
    }

    #[test]
    fn test_channel_id_main_is_gang_one() {
        let main = ChannelId::main(NodeId(1));
        assert!(main.is_main());
        assert!(!ChannelId::new(NodeId(1), 2).is_main());
    }

    #[test]
    fn test_datatype_from_tag_known_tags() {
        for tag in 0x00..=0x05u8 {
            let dt = Datatype::from_tag(tag).expect("known tag");
            assert_eq!(dt.tag(), tag);
        }
    }

    #[test]
    fn test_datatype_try_from_unknown_tag_errors() {
        let err = Datatype::try_from(0x09).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownDatatype(0x09));
    }

    #[test]
    fn test_datatype_serializes_lowercase() {
        let json = serde_json::to_string(&Datatype::Bitmap).unwrap();
        assert_eq!(json, r#""bitmap""#);
    }

    #[test]
    fn test_read_request_frame_is_raw_zero_byte() {
        let frame = DataPointFrame::read_request(DpId(4));
        assert_eq!(frame.tag, 0x00);
        assert_eq!(frame.payload, vec![0x00]);
        assert!(frame.is_read_request());
    }

    #[test]
    fn test_raw_frame_with_data_is_not_a_read_request() {
        let frame = DataPointFrame::new(DpId(4), Datatype::Raw, vec![0x00, 0x01]);
        assert!(!frame.is_read_request());
    }

    #[test]
    fn test_frame_datatype_unknown_tag_is_none() {
        let frame = DataPointFrame {
            dp: DpId(1),
            tag: 0x7f,
            payload: vec![1],
        };
        assert_eq!(frame.datatype(), None);
    }

    #[test]
    fn test_decoded_value_as_bool_accepts_integer_zero_one() {
        assert_eq!(DecodedValue::Bool(true).as_bool(), Some(true));
        assert_eq!(DecodedValue::Value(1).as_bool(), Some(true));
        assert_eq!(DecodedValue::Enum(0).as_bool(), Some(false));
        assert_eq!(DecodedValue::Value(7).as_bool(), None);
        assert_eq!(DecodedValue::String("1".into()).as_bool(), None);
    }

    #[test]
    fn test_decoded_value_serializes_adjacently_tagged() {
        let json = serde_json::to_string(&DecodedValue::Value(500)).unwrap();
        assert_eq!(json, r#"{"type":"value","value":500}"#);
    }

    #[test]
    fn test_decoded_value_display() {
        assert_eq!(DecodedValue::Raw(vec![0xde, 0xad]).to_string(), "0xdead");
        assert_eq!(DecodedValue::Enum(2).to_string(), "enum(2)");
        assert_eq!(DecodedValue::Bitmap(5).to_string(), "0b101");
    }
}
