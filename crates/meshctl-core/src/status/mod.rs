// ── DFU status payload decoding ──
//
// Layouts reported by the distributor:
//
//   upload:     [] | [percent:u8, ...]
//   distribute: [count:u16le][count x (addr:u16le, phase:u8, progress:u8)]
//   complete:   same as distribute, phase carries the final outcome
//
// The overall progress bar is split in two halves: upload fills 0-50,
// distribution fills 50-100.

mod reader;

use serde::Serialize;
use thiserror::Error;

use crate::model::{NodeAddress, NodePhase};

use reader::ByteReader;

const NODE_ENTRY_LEN: usize = 4;
const COUNT_LEN: usize = 2;

/// Why a status payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload truncated: needed {needed} more byte(s), {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    #[error("node count {node_count} does not match payload length {payload_len}")]
    LengthMismatch { node_count: u16, payload_len: usize },
}

/// Upload-to-distributor progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UploadStatus {
    /// Upload running, no percentage reported yet.
    Pending,
    Percent(u8),
}

impl UploadStatus {
    /// Position on the overall bar (first half).
    pub fn overall_percent(self) -> Option<u8> {
        match self {
            Self::Pending => None,
            Self::Percent(p) => Some(p / 2),
        }
    }
}

/// One node entry of a distribute/complete report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub address: NodeAddress,
    pub phase: NodePhase,
    pub progress: u8,
}

pub fn decode_upload_status(payload: &[u8]) -> UploadStatus {
    match payload.first() {
        None => UploadStatus::Pending,
        Some(&p) => UploadStatus::Percent(p.min(100)),
    }
}

/// Decode a distribute- or complete-phase node list.
///
/// The payload must hold exactly `count` entries after the count field.
pub fn decode_node_report(payload: &[u8]) -> Result<Vec<NodeReport>, DecodeError> {
    let mut reader = ByteReader::new(payload);
    let node_count = reader.read_u16_le()?;

    let expected = usize::from(node_count) * NODE_ENTRY_LEN;
    if payload.len() - COUNT_LEN != expected {
        return Err(DecodeError::LengthMismatch {
            node_count,
            payload_len: payload.len(),
        });
    }

    let mut nodes = Vec::with_capacity(usize::from(node_count));
    while reader.remaining() >= NODE_ENTRY_LEN {
        let address = NodeAddress(reader.read_u16_le()?);
        let phase = NodePhase::from_raw(reader.read_u8()?);
        let progress = reader.read_u8()?.min(100);
        nodes.push(NodeReport {
            address,
            phase,
            progress,
        });
    }
    Ok(nodes)
}

/// Straggler-bounded distribution progress (0-100).
///
/// Minimum progress over nodes in `TransferActive`; any `Idle` node
/// means distribution has not really begun and forces 0. With no
/// active node at all the result stays at 100.
pub fn aggregate_distribution_progress(nodes: &[NodeReport]) -> u8 {
    let mut min = 100u8;
    for node in nodes {
        match node.phase {
            NodePhase::TransferActive => min = min.min(node.progress),
            NodePhase::Idle => return 0,
            _ => {}
        }
    }
    min
}

/// Position on the overall bar (second half).
pub fn distribution_overall_percent(aggregate: u8) -> u8 {
    aggregate.min(100) / 2 + 50
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(addr: u16, phase: u8, progress: u8) -> [u8; 4] {
        let [lo, hi] = addr.to_le_bytes();
        [lo, hi, phase, progress]
    }

    fn report(entries: &[[u8; 4]]) -> Vec<u8> {
        let count = u16::try_from(entries.len()).unwrap();
        let mut out = count.to_le_bytes().to_vec();
        for e in entries {
            out.extend_from_slice(e);
        }
        out
    }

    #[test]
    fn empty_upload_payload_is_pending() {
        assert_eq!(decode_upload_status(&[]), UploadStatus::Pending);
        assert_eq!(UploadStatus::Pending.overall_percent(), None);
    }

    #[test]
    fn upload_percent_fills_first_half() {
        for p in 0..=100u8 {
            assert_eq!(decode_upload_status(&[p]).overall_percent(), Some(p / 2));
        }
        assert_eq!(decode_upload_status(&[250, 1]).overall_percent(), Some(50));
    }

    #[test]
    fn two_node_report_of_ten_bytes_decodes() {
        let payload = report(&[entry(0x1, 2, 80), entry(0x2, 2, 40)]);
        assert_eq!(payload.len(), 10);
        let nodes = decode_node_report(&payload).unwrap();
        assert_eq!(
            nodes,
            vec![
                NodeReport {
                    address: NodeAddress(1),
                    phase: NodePhase::TransferActive,
                    progress: 80
                },
                NodeReport {
                    address: NodeAddress(2),
                    phase: NodePhase::TransferActive,
                    progress: 40
                },
            ]
        );
    }

    #[test]
    fn nine_byte_report_for_two_nodes_is_rejected() {
        let mut payload = report(&[entry(0x1, 2, 80), entry(0x2, 2, 40)]);
        payload.pop();
        assert_eq!(
            decode_node_report(&payload),
            Err(DecodeError::LengthMismatch {
                node_count: 2,
                payload_len: 9
            })
        );
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut payload = report(&[entry(0x1, 2, 80)]);
        payload.push(0);
        assert!(matches!(
            decode_node_report(&payload),
            Err(DecodeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn missing_count_is_truncated() {
        assert!(matches!(
            decode_node_report(&[0x01]),
            Err(DecodeError::Truncated { .. })
        ));
        assert!(matches!(
            decode_node_report(&[]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn zero_nodes_is_a_valid_report() {
        assert_eq!(decode_node_report(&[0, 0]).unwrap(), Vec::new());
    }

    #[test]
    fn aggregate_is_minimum_of_active_nodes() {
        let nodes = decode_node_report(&report(&[entry(1, 2, 80), entry(2, 2, 40)])).unwrap();
        let agg = aggregate_distribution_progress(&nodes);
        assert_eq!(agg, 40);
        assert_eq!(distribution_overall_percent(agg), 70);
    }

    #[test]
    fn idle_node_forces_zero() {
        let nodes =
            decode_node_report(&report(&[entry(1, 2, 80), entry(2, 0, 0), entry(3, 2, 10)]))
                .unwrap();
        let agg = aggregate_distribution_progress(&nodes);
        assert_eq!(agg, 0);
        assert_eq!(distribution_overall_percent(agg), 50);
    }

    #[test]
    fn non_active_phases_do_not_pull_the_minimum() {
        let nodes = decode_node_report(&report(&[entry(1, 5, 0), entry(2, 2, 90)])).unwrap();
        assert_eq!(aggregate_distribution_progress(&nodes), 90);
        let done = decode_node_report(&report(&[entry(1, 5, 100)])).unwrap();
        assert_eq!(distribution_overall_percent(aggregate_distribution_progress(&done)), 100);
    }
}
