//!
//! The ghpulse crate contains the GitHub Archive ingestion logic, regardless of whether a Lambda
//! or the command line is driving it.
//!
//! An ingestion run downloads one hour of the archive, decompresses it, counts the events seen
//! for every repository and stores the resulting report as a new partition in the configured
//! [objects::BlobStore].
//!
pub mod archive;
pub mod backfill;
pub mod error;
pub mod ingest;
pub mod objects;
pub mod partition;

pub use error::{ArchiveError, ArchiveResult};

#[cfg(test)]
pub(crate) mod testing {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    /// Gzip the given lines the same way the archive host serves them
    pub fn gzipped(lines: &[&str]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(vec![], Compression::fast());
        for line in lines {
            encoder
                .write_all(line.as_bytes())
                .expect("Failed to write test line");
            encoder.write_all(b"\n").expect("Failed to write newline");
        }
        encoder.finish().expect("Failed to finish gzip stream")
    }
}
