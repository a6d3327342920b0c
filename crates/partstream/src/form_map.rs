//! Field-name maps of realized parts.
//!
//! Consumes a [`FormParts`] stream in source order and buckets the realized
//! parts by field name. [`form_map`] spools any part larger than a threshold
//! to a temporary file; [`all_parts_in_memory`] keeps everything in memory
//! under a per-part size cap.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::Path;

use log::{debug, trace};
use partstream_core::{Encoding, FormParts, MultipartError, ParseError, StreamingPart};

use crate::part::{RealizedPart, create_spool_file, sanitize_stem};

const COPY_CHUNK_SIZE: usize = 8192;

/// Owned collection of realized parts, keyed by field name.
///
/// The collection exclusively owns every temporary file it created;
/// [`close`](Self::close) is the authoritative release point. Dropping the
/// collection releases files best-effort.
#[derive(Debug)]
pub struct Parts {
    part_map: HashMap<Option<String>, Vec<RealizedPart>>,
}

impl Parts {
    /// Realized parts for `field_name`, in source order.
    #[must_use]
    pub fn get(&self, field_name: &str) -> Option<&[RealizedPart]> {
        self.part_map
            .get(&Some(field_name.to_string()))
            .map(Vec::as_slice)
    }

    /// Parts that carried no field name (malformed or headerless parts).
    #[must_use]
    pub fn unnamed(&self) -> Option<&[RealizedPart]> {
        self.part_map.get(&None).map(Vec::as_slice)
    }

    /// The full map, keyed by field name.
    #[must_use]
    pub fn part_map(&self) -> &HashMap<Option<String>, Vec<RealizedPart>> {
        &self.part_map
    }

    /// Total number of realized parts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.part_map.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.part_map.values().all(Vec::is_empty)
    }

    /// Delete every disk-backed temporary file. A second close is a no-op.
    ///
    /// Deletion continues past individual failures; the first error is
    /// returned after all parts were attempted.
    pub fn close(&mut self) -> io::Result<()> {
        let mut first_error: Option<io::Error> = None;
        for parts in self.part_map.values_mut() {
            for part in parts {
                if let Err(err) = part.release() {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for Parts {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Realize every part of `parts` into a [`Parts`] collection, spooling
/// parts larger than `write_to_disk_threshold` bytes to uniquely named
/// temporary files under `temporary_file_directory` (the platform default
/// when `None`).
///
/// A part that ends exactly at the threshold stays in memory; the first
/// byte past it sends the part to disk.
pub fn form_map<R: Read>(
    mut parts: FormParts<R>,
    encoding: Encoding,
    write_to_disk_threshold: usize,
    temporary_file_directory: Option<&Path>,
) -> Result<Parts, MultipartError> {
    let mut part_map: HashMap<Option<String>, Vec<RealizedPart>> = HashMap::new();

    while parts.has_next().map_err(ParseError::into_cause)? {
        let part = parts.next_part().map_err(ParseError::into_cause)?;
        let field_name = part.field_name().map(ToString::to_string);
        let realized = realize(
            part,
            encoding,
            write_to_disk_threshold,
            temporary_file_directory,
        )?;
        part_map.entry(field_name).or_default().push(realized);
    }

    Ok(Parts { part_map })
}

/// Realize every part in memory, failing with
/// [`MultipartError::StreamTooLong`] when any single part exceeds
/// `max_part_size` bytes.
pub fn all_parts_in_memory<R: Read>(
    mut parts: FormParts<R>,
    encoding: Encoding,
    max_part_size: usize,
) -> Result<Parts, MultipartError> {
    let mut part_map: HashMap<Option<String>, Vec<RealizedPart>> = HashMap::new();

    while parts.has_next().map_err(ParseError::into_cause)? {
        let mut part = parts.next_part().map_err(ParseError::into_cause)?;
        let bytes = part.contents_as_bytes(max_part_size)?;
        let field_name = part.field_name().map(ToString::to_string);
        part_map
            .entry(field_name)
            .or_default()
            .push(RealizedPart::in_memory(&part, bytes, encoding));
    }

    Ok(Parts { part_map })
}

fn realize<R: Read>(
    mut part: StreamingPart<R>,
    encoding: Encoding,
    threshold: usize,
    directory: Option<&Path>,
) -> Result<RealizedPart, MultipartError> {
    let mut scratch: Vec<u8> = Vec::with_capacity(threshold);
    loop {
        match part.content().read_byte()? {
            None => {
                part.close()?;
                trace!(
                    "part {:?} realized in memory ({} bytes)",
                    part.field_name(),
                    scratch.len()
                );
                return Ok(RealizedPart::in_memory(&part, scratch, encoding));
            }
            Some(byte) => {
                scratch.push(byte);
                if scratch.len() >= threshold {
                    // spill only when another byte actually follows
                    match part.content().read_byte()? {
                        None => {
                            part.close()?;
                            return Ok(RealizedPart::in_memory(&part, scratch, encoding));
                        }
                        Some(next) => {
                            scratch.push(next);
                            return write_to_disk(part, &scratch, encoding, directory);
                        }
                    }
                }
            }
        }
    }
}

fn write_to_disk<R: Read>(
    mut part: StreamingPart<R>,
    buffered: &[u8],
    encoding: Encoding,
    directory: Option<&Path>,
) -> Result<RealizedPart, MultipartError> {
    let stem = sanitize_stem(part.file_name().unwrap_or(""));
    let (path, mut file) = create_spool_file(&stem, directory)?;
    debug!(
        "spooling part {:?} to {}",
        part.field_name(),
        path.display()
    );

    let copied = copy_contents(&mut part, &mut file, buffered);
    match copied {
        Ok(len) => Ok(RealizedPart::disk_backed(&part, path, len, encoding)),
        Err(err) => {
            drop(file);
            let _ = std::fs::remove_file(&path);
            Err(err)
        }
    }
}

fn copy_contents<R: Read>(
    part: &mut StreamingPart<R>,
    file: &mut std::fs::File,
    buffered: &[u8],
) -> Result<u64, MultipartError> {
    file.write_all(buffered)?;
    let mut len = buffered.len() as u64;

    let mut chunk: Vec<u8> = Vec::with_capacity(COPY_CHUNK_SIZE);
    loop {
        match part.content().read_byte()? {
            Some(byte) => {
                chunk.push(byte);
                len += 1;
                if chunk.len() >= COPY_CHUNK_SIZE {
                    file.write_all(&chunk)?;
                    chunk.clear();
                }
            }
            None => break,
        }
    }
    file.write_all(&chunk)?;
    part.close()?;
    Ok(len)
}
