use core::fmt;

use crate::{OtaError, OtaState};

/// Where a transfer stands.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct ChunkInfo {
    pub total_size: u32,
    pub chunk_size: u32,
    pub total_chunks: u32,
    pub received_chunks: u32,
    pub received_bytes: u32,
    pub next_expected_chunk: u32,
}

impl ChunkInfo {
    pub fn new(total_size: u32, chunk_size: u32) -> ChunkInfo {
        ChunkInfo {
            total_size,
            chunk_size,
            total_chunks: total_size.div_ceil(chunk_size),
            received_chunks: 0,
            received_bytes: 0,
            next_expected_chunk: 0,
        }
    }

    /// Whole percent of the declared size received so far.
    pub fn percent(&self) -> u8 {
        if self.total_size == 0 {
            return 0;
        }
        (self.received_bytes as u64 * 100 / self.total_size as u64) as u8
    }
}

/// Counters kept across sessions.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Statistics {
    /// Sessions started.
    pub total_updates: u32,
    pub successful_updates: u32,
    pub failed_updates: u32,
}

impl Statistics {
    /// Percentage of started sessions that produced a valid image.
    pub fn success_rate(&self) -> f32 {
        if self.total_updates == 0 {
            return 0.0;
        }
        self.successful_updates as f32 * 100.0 / self.total_updates as f32
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "OTA statistics")?;
        writeln!(f, "  Total Updates:    {}", self.total_updates)?;
        writeln!(f, "  Successful:       {}", self.successful_updates)?;
        writeln!(f, "  Failed:           {}", self.failed_updates)?;
        write!(f, "  Success Rate:     {:.1}%", self.success_rate())
    }
}

/// A snapshot of the manager, for printing.
#[derive(Debug, Copy, Clone)]
pub struct OtaStatus {
    pub state: OtaState,
    pub last_error: Option<OtaError>,
    pub progress_percent: u8,
    pub chunk_info: ChunkInfo,
    pub restart_required: bool,
    pub abort_requested: bool,
}

impl fmt::Display for OtaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "YES" } else { "NO" };
        writeln!(f, "OTA manager status")?;
        writeln!(f, "  State:            {}", self.state)?;
        match self.last_error {
            Some(e) => writeln!(f, "  Last Error:       {}", e)?,
            None => writeln!(f, "  Last Error:       none")?,
        }
        writeln!(f, "  Progress:         {}%", self.progress_percent)?;
        writeln!(
            f,
            "  Received Bytes:   {}/{}",
            self.chunk_info.received_bytes, self.chunk_info.total_size
        )?;
        writeln!(
            f,
            "  Received Chunks:  {}/{}",
            self.chunk_info.received_chunks, self.chunk_info.total_chunks
        )?;
        writeln!(f, "  Restart Required: {}", yes_no(self.restart_required))?;
        write!(f, "  Abort Requested:  {}", yes_no(self.abort_requested))
    }
}
