//! Tokenizer for the attested-key wire format.
//!
//! A blob holds one or more records separated by blank lines. A record is
//! zero or more `#Key=Value` metadata lines, exactly one key line beginning
//! with `ssh`, and the base64 signature spread over the following lines up
//! to a blank line or end of input. The signature covers the metadata lines
//! and the key line, each terminated by a single newline, in the order they
//! were received; that byte sequence is kept verbatim in `signed_data`.

/// One attested-key record as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedKeyRecord {
    /// Expiry deadline, Unix seconds. `None` when absent or non-numeric.
    pub timestamp: Option<i64>,
    /// Instance the key is bound to.
    pub instance_id: Option<String>,
    pub caller: Option<String>,
    pub request_id: Option<String>,
    /// The OpenSSH authorized-keys line.
    pub key_line: String,
    /// Metadata lines plus key line, each with exactly one trailing `\n`,
    /// in wire order. This is the byte sequence the signature covers,
    /// including `#` lines whose key is not recognized.
    pub signed_data: Vec<u8>,
    /// Base64 signature text, continuation lines joined without interior
    /// whitespace.
    pub signature_b64: String,
}

/// Lazy iterator over the records of a blob. Garbage between blank-line
/// separators is skipped; parsing resumes at the next separator.
pub fn records(input: &str) -> Records<'_> {
    Records {
        lines: input.split('\n'),
    }
}

pub struct Records<'a> {
    lines: std::str::Split<'a, char>,
}

impl<'a> Iterator for Records<'a> {
    type Item = AttestedKeyRecord;

    fn next(&mut self) -> Option<AttestedKeyRecord> {
        loop {
            // Skip separators, including the empty tail a trailing newline
            // produces.
            let mut line = self.lines.next()?;
            while line.trim().is_empty() {
                line = self.lines.next()?;
            }

            let mut record = AttestedKeyRecord {
                timestamp: None,
                instance_id: None,
                caller: None,
                request_id: None,
                key_line: String::new(),
                signed_data: Vec::new(),
                signature_b64: String::new(),
            };

            // Metadata lines. Every `#` line is part of the signed bytes
            // even when its key is not one we interpret.
            while line.starts_with('#') {
                record.signed_data.extend_from_slice(line.as_bytes());
                record.signed_data.push(b'\n');
                if let Some((key, value)) = line[1..].split_once('=') {
                    match key {
                        "Timestamp" => record.timestamp = value.trim().parse().ok(),
                        "Instance" => record.instance_id = Some(value.to_string()),
                        "Caller" => record.caller = Some(value.to_string()),
                        "Request" => record.request_id = Some(value.to_string()),
                        _ => {}
                    }
                }
                line = match self.lines.next() {
                    Some(next) => next,
                    None => return None,
                };
            }

            if line.trim().is_empty() {
                // Metadata with no key line, terminated by a separator.
                // Drop the fragment and resume at the next record.
                continue;
            }

            if !line.starts_with("ssh") {
                // Not a record. Drop everything up to the next separator
                // and try again.
                loop {
                    match self.lines.next() {
                        Some(next) if !next.trim().is_empty() => continue,
                        Some(_) => break,
                        None => return None,
                    }
                }
                continue;
            }

            record.key_line = line.to_string();
            record.signed_data.extend_from_slice(line.as_bytes());
            record.signed_data.push(b'\n');

            // Signature continuation lines run to the next blank line or
            // end of input; the two terminate a record equivalently.
            for sig_line in self.lines.by_ref() {
                let sig_line = sig_line.trim();
                if sig_line.is_empty() {
                    break;
                }
                record.signature_b64.push_str(sig_line);
            }

            return Some(record);
        }
    }
}
