//! Splits a file into the fixed-size pieces the ingestion service reassembles.

use std::io::{self, Read};

use serde::{Deserialize, Serialize};

/// How the total number of chunks is derived from the file size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkCountPolicy {
    /// `ceil(size / chunk_size)`, and one (empty) chunk for an empty file.
    #[default]
    Exact,
    /// `size / chunk_size + 1`. A size that is a multiple of the chunk size
    /// ends with an empty chunk.
    LegacyPlusOne,
}

impl ChunkCountPolicy {
    pub fn chunk_count(self, file_size: u64, chunk_size: u64) -> u64 {
        let chunk_size = chunk_size.max(1);
        match self {
            ChunkCountPolicy::Exact => file_size.div_ceil(chunk_size).max(1),
            ChunkCountPolicy::LegacyPlusOne => file_size / chunk_size + 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 1-based.
    pub number: u64,
    pub total: u64,
    pub data: Vec<u8>,
}

/// Yields exactly `total` chunks read sequentially from `reader`.
pub struct ChunkReader<R> {
    reader: R,
    chunk_size: u64,
    total: u64,
    next: u64,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(reader: R, file_size: u64, chunk_size: u64, policy: ChunkCountPolicy) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            total: policy.chunk_count(file_size, chunk_size),
            next: 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.total {
            return None;
        }

        let mut data = Vec::new();
        if let Err(e) = self
            .reader
            .by_ref()
            .take(self.chunk_size)
            .read_to_end(&mut data)
        {
            self.next = self.total + 1;
            return Some(Err(e));
        }

        let chunk = Chunk {
            number: self.next,
            total: self.total,
            data,
        };
        self.next += 1;
        Some(Ok(chunk))
    }
}
