//! BPS patch generation.
//!
//! Both generators follow beat's encoders so that equal inputs produce the
//! same patch bytes as other beat-derived tools.

use super::{Action, BpsPatch};
use crate::checksum::crc32;
use crate::Result;

/// Shortest match worth encoding as anything but literal bytes.
const MIN_MATCH: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BpsMode {
    /// Single forward scan for in-place matches and byte runs.
    #[default]
    Linear,
    /// Hash-chained search for matches anywhere in source or target.
    Delta,
}

impl BpsPatch {
    pub fn create(source: &[u8], target: &[u8], mode: BpsMode) -> Result<Self> {
        Self::create_with_metadata(source, target, mode, Vec::new())
    }

    pub fn create_with_metadata(
        source: &[u8],
        target: &[u8],
        mode: BpsMode,
        metadata: Vec<u8>,
    ) -> Result<Self> {
        let actions = match mode {
            BpsMode::Linear => linear(source, target),
            BpsMode::Delta => delta(source, target),
        };
        log::debug!(
            "generated {} BPS actions ({mode:?}) for {} -> {} bytes",
            actions.len(),
            source.len(),
            target.len()
        );

        let mut patch = BpsPatch {
            source_size: source.len() as u64,
            target_size: target.len() as u64,
            metadata,
            actions,
            source_crc: crc32(source),
            target_crc: crc32(target),
            patch_crc: 0,
        };
        let bytes = patch.export()?;
        let mut crc = [0; 4];
        crc.copy_from_slice(&bytes[bytes.len() - 4..]);
        patch.patch_crc = u32::from_le_bytes(crc);
        Ok(patch)
    }
}

/// Accumulates output positions that have no better encoding than literal
/// bytes, so consecutive ones become a single TargetRead.
struct Literals<'a> {
    target: &'a [u8],
    pending: usize,
}

impl<'a> Literals<'a> {
    fn new(target: &'a [u8]) -> Self {
        Self { target, pending: 0 }
    }

    /// Emits the `pending` bytes that end at `output_offset`.
    fn flush(&mut self, actions: &mut Vec<Action>, output_offset: usize) {
        if self.pending == 0 {
            return;
        }
        let start = output_offset - self.pending;
        actions.push(Action::TargetRead {
            bytes: self.target[start..output_offset].to_vec(),
        });
        self.pending = 0;
    }
}

fn linear(source: &[u8], target: &[u8]) -> Vec<Action> {
    let mut actions = Vec::new();
    let mut literals = Literals::new(target);
    let mut target_relative_offset = 0;
    let mut output_offset = 0;

    let overlap = source.len().min(target.len());
    while output_offset < target.len() {
        let source_length = (output_offset..overlap)
            .take_while(|&n| source[n] == target[n])
            .count();

        let seed = target[output_offset];
        let rle_length = target[output_offset + 1..]
            .iter()
            .take_while(|&&x| x == seed)
            .count();

        if rle_length >= MIN_MATCH {
            // the repeated byte itself goes out literally
            literals.pending += 1;
            output_offset += 1;
            literals.flush(&mut actions, output_offset);

            actions.push(Action::TargetCopy {
                length: rle_length,
                relative_offset: offset_delta(output_offset - 1, target_relative_offset),
            });
            output_offset += rle_length;
            target_relative_offset = output_offset - 1;
        } else if source_length >= MIN_MATCH {
            literals.flush(&mut actions, output_offset);
            actions.push(Action::SourceRead {
                length: source_length,
            });
            output_offset += source_length;
        } else {
            literals.pending += 1;
            output_offset += 1;
        }
    }

    literals.flush(&mut actions, output_offset);
    actions
}

/// Two-byte lookup key; the final byte of a buffer stands alone.
fn symbol(data: &[u8], offset: usize) -> usize {
    let low = usize::from(data[offset]);
    match data.get(offset + 1) {
        Some(&high) => low | usize::from(high) << 8,
        None => low,
    }
}

/// Offsets sharing each symbol. Chains are walked newest first.
struct Chains(Vec<Vec<usize>>);

impl Chains {
    fn new() -> Self {
        Self(vec![Vec::new(); 1 << 16])
    }

    fn insert(&mut self, symbol: usize, offset: usize) {
        self.0[symbol].push(offset);
    }

    fn walk(&self, symbol: usize) -> impl Iterator<Item = usize> + '_ {
        self.0[symbol].iter().rev().copied()
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    SourceRead,
    TargetRead,
    SourceCopy,
    TargetCopy,
}

fn delta(source: &[u8], target: &[u8]) -> Vec<Action> {
    let mut actions = Vec::new();
    let mut literals = Literals::new(target);
    let mut source_relative_offset = 0;
    let mut target_relative_offset = 0;
    let mut output_offset = 0;

    let mut source_tree = Chains::new();
    for offset in 0..source.len() {
        source_tree.insert(symbol(source, offset), offset);
    }
    let mut target_tree = Chains::new();

    while output_offset < target.len() {
        let mut max_length = 0;
        let mut max_offset = 0;
        let mut mode = Mode::TargetRead;

        let key = symbol(target, output_offset);
        let remaining = &target[output_offset..];

        let length = common_prefix(source.get(output_offset..).unwrap_or_default(), remaining);
        if length > max_length {
            max_length = length;
            mode = Mode::SourceRead;
        }

        for offset in source_tree.walk(key) {
            let length = common_prefix(&source[offset..], remaining);
            if length > max_length {
                max_length = length;
                max_offset = offset;
                mode = Mode::SourceCopy;
            }
        }

        for offset in target_tree.walk(key) {
            // may run into the region being matched, which apply reproduces
            // by copying a byte at a time
            let length = (0..remaining.len())
                .take_while(|&n| target[offset + n] == remaining[n])
                .count();
            if length > max_length {
                max_length = length;
                max_offset = offset;
                mode = Mode::TargetCopy;
            }
        }
        target_tree.insert(key, output_offset);

        if max_length < MIN_MATCH {
            max_length = 1;
            mode = Mode::TargetRead;
        }

        if mode != Mode::TargetRead {
            literals.flush(&mut actions, output_offset);
        }

        match mode {
            Mode::SourceRead => actions.push(Action::SourceRead { length: max_length }),
            Mode::TargetRead => literals.pending += max_length,
            Mode::SourceCopy => {
                actions.push(Action::SourceCopy {
                    length: max_length,
                    relative_offset: offset_delta(max_offset, source_relative_offset),
                });
                source_relative_offset = max_offset + max_length;
            }
            Mode::TargetCopy => {
                actions.push(Action::TargetCopy {
                    length: max_length,
                    relative_offset: offset_delta(max_offset, target_relative_offset),
                });
                target_relative_offset = max_offset + max_length;
            }
        }

        output_offset += max_length;
    }

    literals.flush(&mut actions, output_offset);
    actions
}

fn offset_delta(to: usize, from: usize) -> i64 {
    to as i64 - from as i64
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn round_trip(source: &[u8], target: &[u8], mode: BpsMode) -> BpsPatch {
        let patch = BpsPatch::create(source, target, mode).unwrap();
        let bytes = patch.export().unwrap();
        let parsed = BpsPatch::parse(&bytes).unwrap();
        assert_eq!(parsed, patch);
        assert_eq!(parsed.apply(source).unwrap(), target.to_vec());
        patch
    }

    #[test]
    fn short_match_stays_literal() {
        // a 3-byte match is below the threshold
        for mode in [BpsMode::Linear, BpsMode::Delta] {
            let patch = round_trip(&[0, 0, 0, 0], &[0, 0, 0, 1], mode);
            assert_eq!(
                patch.actions,
                [Action::TargetRead {
                    bytes: vec![0, 0, 0, 1]
                }]
            );
        }
    }

    #[test]
    fn delta_prefers_source_read() {
        let patch = round_trip(&[0; 8], &[0, 0, 0, 0, 0, 0, 0, 1], BpsMode::Delta);
        assert_eq!(
            patch.actions,
            [
                Action::SourceRead { length: 7 },
                Action::TargetRead { bytes: vec![1] },
            ]
        );
    }

    #[test]
    fn linear_encodes_runs_as_target_copy() {
        let source = b"hello world, hello bps";
        let mut target = source.to_vec();
        target[6..12].copy_from_slice(b"======");
        let patch = round_trip(source, &target, BpsMode::Linear);
        assert_eq!(
            patch.actions,
            [
                Action::SourceRead { length: 6 },
                Action::TargetRead {
                    bytes: b"=".to_vec()
                },
                Action::TargetCopy {
                    length: 5,
                    relative_offset: 6,
                },
                Action::SourceRead { length: 10 },
            ]
        );
    }

    #[test]
    fn delta_finds_moved_blocks() {
        let source = b"0123456789abcdefghijklmnopqrstuv";
        let target = b"ghijklmnop0123456789ghijklmnop";
        let patch = round_trip(source, target, BpsMode::Delta);
        // the last block matches both source and target equally well;
        // source copies win ties
        assert_eq!(
            patch.actions,
            [
                Action::SourceCopy {
                    length: 10,
                    relative_offset: 16,
                },
                Action::SourceCopy {
                    length: 10,
                    relative_offset: -26,
                },
                Action::SourceCopy {
                    length: 10,
                    relative_offset: 6,
                },
            ]
        );
    }

    #[test]
    fn delta_copies_from_target() {
        let patch = round_trip(b"", b"abcdefghabcdefgh", BpsMode::Delta);
        assert_eq!(
            patch.actions,
            [
                Action::TargetRead {
                    bytes: b"abcdefgh".to_vec()
                },
                Action::TargetCopy {
                    length: 8,
                    relative_offset: 0,
                },
            ]
        );
    }

    #[test]
    fn empty_inputs() {
        for mode in [BpsMode::Linear, BpsMode::Delta] {
            assert!(round_trip(b"", b"", mode).actions.is_empty());
            round_trip(b"abc", b"", mode);
            round_trip(b"", b"abcabcabcabc", mode);
        }
    }

    #[test]
    fn unchanged_file_is_one_source_read() {
        let data: Vec<u8> = (0..=255).cycle().take(4096).collect();
        for mode in [BpsMode::Linear, BpsMode::Delta] {
            let patch = round_trip(&data, &data, mode);
            assert_eq!(patch.actions, [Action::SourceRead { length: 4096 }]);
        }
    }
}
