use sea_replay_types::Range;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
/// Bytes of one resource held at their offsets. Blocks are kept disjoint and non-adjacent:
/// inserting bytes that touch existing blocks merges them, so any covered range lives
/// inside a single block.
pub struct SparseBuffer {
    blocks: BTreeMap<u64, Vec<u8>>,
}

impl SparseBuffer {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, offset: u64, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        let end = offset + bytes.len() as u64;
        let touching: Vec<u64> = self
            .blocks
            .range(..=end)
            .rev()
            .take_while(|(start, block)| *start + block.len() as u64 >= offset)
            .map(|(start, _)| *start)
            .collect();

        let mut pieces: Vec<(u64, Vec<u8>)> = Vec::with_capacity(touching.len() + 1);
        for start in touching {
            if let Some(block) = self.blocks.remove(&start) {
                pieces.push((start, block));
            }
        }
        pieces.push((offset, bytes));
        // stable, so on equal starts an existing block stays the base
        pieces.sort_by_key(|(start, _)| *start);

        let mut pieces = pieces.into_iter();
        let (base_start, mut base) = match pieces.next() {
            Some(piece) => piece,
            None => return,
        };
        for (start, bytes) in pieces {
            let base_end = base_start + base.len() as u64;
            let piece_end = start + bytes.len() as u64;
            if piece_end > base_end {
                let skip = (base_end - start) as usize;
                base.extend_from_slice(&bytes[skip..]);
            }
        }
        self.blocks.insert(base_start, base);
    }

    /// A copy of the bytes in `range`, if all of them are present.
    pub fn get(&self, range: Range) -> Option<Vec<u8>> {
        if range.is_empty() {
            return Some(Vec::new());
        }
        let (start, block) = self.blocks.range(..=range.start).next_back()?;
        let block_end = start + block.len() as u64;
        if block_end < range.end {
            return None;
        }
        let from = (range.start - start) as usize;
        Some(block[from..from + range.len() as usize].to_vec())
    }

    /// The covered ranges, sorted and disjoint.
    pub fn ranges(&self) -> Vec<Range> {
        self.blocks
            .iter()
            .map(|(start, block)| Range::new(*start, start + block.len() as u64))
            .collect()
    }

    /// Number of bytes held.
    pub fn size(&self) -> u64 {
        self.blocks.values().map(|b| b.len() as u64).sum()
    }
}
