//! Byte layout of a DP cluster command.
//!
//! ```text
//! ┌──────────────┬────────┬──────────┬──────────────┬─────────────┐
//! │ seq (u16 BE) │ dp (u8)│ tag (u8) │ len (u16 BE) │ payload ... │  ← record 1
//! └──────────────┴────────┴──────────┴──────────────┴─────────────┘
//!                 └──────────── repeated for each record ─────────┘
//! ```
//!
//! The layout must stay byte-compatible with devices already in the
//! field. A sniffed power-on-behavior report, for example, reads
//! `00 0b 0e 04 00 01 01`: sequence 11, DP 14, enum, one byte, value 1.

use serde::{Deserialize, Serialize};

use crate::{DataPointFrame, DpId, ProtocolError};

/// Size of the per-record header: dp + tag + 2-byte length.
pub const RECORD_HEADER_LEN: usize = 4;

const SEQ_LEN: usize = 2;

/// A cluster command: a transaction sequence number and its DP records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpCommand {
    /// Transaction sequence number chosen by the sender.
    pub seq: u16,
    /// The DP records, in wire order.
    pub records: Vec<DataPointFrame>,
}

impl DpCommand {
    /// A command carrying a single record.
    pub fn single(seq: u16, frame: DataPointFrame) -> Self {
        Self {
            seq,
            records: vec![frame],
        }
    }

    /// Serializes the command to its wire bytes.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidValue`] if a payload is longer than the
    /// 16-bit length field can describe.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let body: usize = self
            .records
            .iter()
            .map(|r| RECORD_HEADER_LEN + r.payload.len())
            .sum();
        let mut out = Vec::with_capacity(SEQ_LEN + body);
        out.extend_from_slice(&self.seq.to_be_bytes());

        for record in &self.records {
            let len = u16::try_from(record.payload.len()).map_err(|_| {
                ProtocolError::InvalidValue(format!(
                    "{} payload of {} bytes exceeds the length field",
                    record.dp,
                    record.payload.len()
                ))
            })?;
            out.push(record.dp.0);
            out.push(record.tag);
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&record.payload);
        }
        Ok(out)
    }

    /// Parses wire bytes into a command.
    ///
    /// Record tags are kept verbatim, so a record with an unknown
    /// datatype still parses; deciding what to do with it is the
    /// codec's job.
    ///
    /// # Errors
    /// [`ProtocolError::Truncated`] if the buffer ends inside the
    /// sequence number, a record header, or a payload.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (seq_bytes, mut rest) = split(bytes, SEQ_LEN)?;
        let seq = u16::from_be_bytes([seq_bytes[0], seq_bytes[1]]);

        let mut records = Vec::new();
        while !rest.is_empty() {
            let (header, after_header) = split(rest, RECORD_HEADER_LEN)?;
            let len = usize::from(u16::from_be_bytes([header[2], header[3]]));
            let (payload, after_payload) = split(after_header, len)?;
            records.push(DataPointFrame {
                dp: DpId(header[0]),
                tag: header[1],
                payload: payload.to_vec(),
            });
            rest = after_payload;
        }

        Ok(Self { seq, records })
    }
}

fn split(bytes: &[u8], n: usize) -> Result<(&[u8], &[u8]), ProtocolError> {
    if bytes.len() < n {
        return Err(ProtocolError::Truncated {
            needed: n,
            available: bytes.len(),
        });
    }
    Ok(bytes.split_at(n))
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Datatype, DecodedValue, decode};

    #[test]
    fn test_parse_sniffed_power_on_report() {
        let cmd = DpCommand::parse(&[0x00, 0x0b, 0x0e, 0x04, 0x00, 0x01, 0x01]).unwrap();
        assert_eq!(cmd.seq, 11);
        assert_eq!(cmd.records.len(), 1);
        let record = &cmd.records[0];
        assert_eq!(record.dp, DpId(14));
        assert_eq!(record.datatype(), Some(Datatype::Enum));
        assert_eq!(decode(record), Some(DecodedValue::Enum(1)));
    }

    #[test]
    fn test_to_bytes_matches_device_layout() {
        let cmd = DpCommand::single(
            0x0063,
            DataPointFrame::new(DpId(14), Datatype::Enum, vec![0x02]),
        );
        assert_eq!(
            cmd.to_bytes().unwrap(),
            vec![0x00, 0x63, 0x0e, 0x04, 0x00, 0x01, 0x02]
        );
    }

    #[test]
    fn test_parse_multiple_records() {
        let bytes = [
            0x00, 0x01, // seq
            0x01, 0x01, 0x00, 0x01, 0x01, // dp1 bool true
            0x02, 0x02, 0x00, 0x04, 0x00, 0x00, 0x01, 0xf4, // dp2 value 500
        ];
        let cmd = DpCommand::parse(&bytes).unwrap();
        assert_eq!(cmd.records.len(), 2);
        assert_eq!(decode(&cmd.records[1]), Some(DecodedValue::Value(500)));
        assert_eq!(cmd.to_bytes().unwrap(), bytes.to_vec());
    }

    #[test]
    fn test_parse_keeps_unknown_tag() {
        let cmd = DpCommand::parse(&[0x00, 0x02, 0x1a, 0x09, 0x00, 0x00]).unwrap();
        assert_eq!(cmd.records[0].tag, 0x09);
        assert!(cmd.records[0].payload.is_empty());
    }

    #[test]
    fn test_parse_truncated_payload_errors() {
        let err = DpCommand::parse(&[0x00, 0x01, 0x01, 0x01, 0x00, 0x02, 0x01]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Truncated {
                needed: 2,
                available: 1
            }
        );
    }

    #[test]
    fn test_parse_truncated_header_errors() {
        let err = DpCommand::parse(&[0x00, 0x01, 0x01]).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { needed: 4, .. }));
    }

    #[test]
    fn test_parse_empty_buffer_errors() {
        assert!(DpCommand::parse(&[]).is_err());
    }

    #[test]
    fn test_to_bytes_rejects_oversized_payload() {
        let cmd = DpCommand::single(
            1,
            DataPointFrame::new(DpId(1), Datatype::Raw, vec![0; usize::from(u16::MAX) + 1]),
        );
        assert!(matches!(cmd.to_bytes(), Err(ProtocolError::InvalidValue(_))));
    }
}
