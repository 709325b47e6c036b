//! Attachment record fields: pre-data, compressed data chunks, post-data.
//!
//! A record is written and read in three phases. Field types never decrease
//! within a record; `DATA` may repeat, and the record ends with `END`.

use pwat_chunks::MAX_BLOCK_SIZE;
use pwat_core::{AttachmentRecord, PwatError, PwatResult, SecretBytes, SHA1_LEN};
use std::io::{Read, Write};
use tracing::trace;
use uuid::Uuid;

use crate::field::{Field, FieldRead, FieldReader, FieldWriter};
use crate::format::rec;

/// One compressed payload chunk. `data` is `None` when it was skipped.
#[derive(Debug)]
pub struct DataChunk {
    pub data: Option<SecretBytes>,
    pub len: u32,
    pub last: bool,
}

/// Where the codec is inside the record sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordPhase {
    #[default]
    BetweenRecords,
    Data,
    PostData,
}

/// Tracks the record phase and field ordering for one container stream.
#[derive(Debug, Default)]
pub struct RecordCodec {
    phase: RecordPhase,
    last_type: Option<u8>,
}

impl RecordCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RecordPhase {
        self.phase
    }

    fn expect(&self, phase: RecordPhase, what: &'static str) -> PwatResult<()> {
        if self.phase != phase {
            return Err(PwatError::InvalidState(what));
        }
        Ok(())
    }

    fn observe(&mut self, ftype: u8) -> PwatResult<()> {
        if let Some(last) = self.last_type {
            if ftype < last {
                return Err(PwatError::BadRecord(format!(
                    "field type {ftype:#04x} after {last:#04x}"
                )));
            }
        }
        self.last_type = Some(ftype);
        Ok(())
    }

    fn end_record(&mut self) {
        self.phase = RecordPhase::BetweenRecords;
        self.last_type = None;
    }

    // ── Writing ───────────────────────────────────────────────────────────────

    pub fn write_pre<W: Write>(&mut self, out: &mut FieldWriter<W>, r: &AttachmentRecord) -> PwatResult<()> {
        self.expect(RecordPhase::BetweenRecords, "record pre-data written mid-record")?;
        out.write_field(rec::UUID, r.attmt_uuid.as_bytes())?;
        out.write_field(rec::ENTRY_UUID, r.entry_uuid.as_bytes())?;
        out.write_field(rec::FLAGS, &[r.flags])?;
        out.write_field(rec::FILENAME, r.filename.as_bytes())?;
        out.write_field(rec::PATH, r.path.as_bytes())?;
        out.write_field(rec::DESCRIPTION, r.description.as_bytes())?;
        out.write_field(rec::UNCSIZE, &r.uncsize.to_le_bytes())?;
        out.write_field(rec::BLKSIZE, &r.blksize.to_le_bytes())?;
        out.write_field(rec::CTIME, &r.ctime.to_le_bytes())?;
        out.write_field(rec::ATIME, &r.atime.to_le_bytes())?;
        out.write_field(rec::MTIME, &r.mtime.to_le_bytes())?;
        out.write_field(rec::DTIME, &r.dtime.to_le_bytes())?;
        self.phase = RecordPhase::Data;
        self.last_type = Some(rec::DTIME);
        Ok(())
    }

    pub fn write_data<W: Write>(&mut self, out: &mut FieldWriter<W>, chunk: &[u8], last: bool) -> PwatResult<()> {
        self.expect(RecordPhase::Data, "data chunk written outside record data")?;
        if chunk.is_empty() {
            return Err(PwatError::BadRecord("empty data chunk".into()));
        }
        out.write_field(if last { rec::LASTDATA } else { rec::DATA }, chunk)?;
        if last {
            self.phase = RecordPhase::PostData;
        }
        Ok(())
    }

    pub fn write_post<W: Write>(&mut self, out: &mut FieldWriter<W>, r: &AttachmentRecord) -> PwatResult<()> {
        self.expect(RecordPhase::PostData, "post-data written before the last chunk")?;
        out.write_field(rec::CMPSIZE, &r.cmpsize.to_le_bytes())?;
        out.write_field(rec::CRC, &r.crc.to_le_bytes())?;
        out.write_field(rec::ODIGEST, &r.odigest)?;
        out.write_field(rec::CDIGEST, &r.cdigest)?;
        out.write_field(rec::END, &[])?;
        self.end_record();
        Ok(())
    }

    // ── Reading ───────────────────────────────────────────────────────────────

    /// Read the pre-data of the next record. `None` means the stream ended
    /// cleanly between records.
    pub fn read_pre<R: Read>(&mut self, input: &mut FieldReader<R>) -> PwatResult<Option<AttachmentRecord>> {
        self.expect(RecordPhase::BetweenRecords, "record pre-data read mid-record")?;
        let first = match input.read_field(false, &[])? {
            FieldRead::End => return Ok(None),
            FieldRead::Field(field) => field,
        };
        if first.ftype != rec::UUID {
            return Err(PwatError::BadRecord(format!(
                "record starts with field type {:#04x}",
                first.ftype
            )));
        }
        let mut record = AttachmentRecord {
            attmt_uuid: uuid_field(&first)?,
            ..Default::default()
        };
        self.observe(rec::UUID)?;

        loop {
            let field = self.next_field(input, "stream ended inside record pre-data", false)?;
            if !rec::is_predata(field.ftype) {
                return Err(PwatError::BadRecord(format!(
                    "field type {:#04x} before the end of pre-data",
                    field.ftype
                )));
            }
            match field.ftype {
                rec::UUID => record.attmt_uuid = uuid_field(&field)?,
                rec::ENTRY_UUID => record.entry_uuid = uuid_field(&field)?,
                rec::FLAGS => record.flags = u8_field(&field)?,
                rec::FILENAME => record.filename = string_field(&field)?,
                rec::PATH => record.path = string_field(&field)?,
                rec::DESCRIPTION => record.description = string_field(&field)?,
                rec::UNCSIZE => record.uncsize = u32_field(&field)?,
                rec::BLKSIZE => {
                    record.blksize = u32_field(&field)?;
                    if record.blksize > MAX_BLOCK_SIZE {
                        return Err(PwatError::BadRecord(format!(
                            "block size {} exceeds {MAX_BLOCK_SIZE}",
                            record.blksize
                        )));
                    }
                }
                rec::CTIME => record.ctime = time_field(&field)?,
                rec::ATIME => record.atime = time_field(&field)?,
                rec::MTIME => record.mtime = time_field(&field)?,
                rec::DTIME => {
                    record.dtime = time_field(&field)?;
                    break;
                }
                other => trace!(ftype = other, "skipping reserved pre-data field"),
            }
        }
        self.phase = RecordPhase::Data;
        Ok(Some(record))
    }

    /// Read the next data chunk. Reserved pre-data types that follow the
    /// last known pre-data field are skipped.
    pub fn read_data<R: Read>(&mut self, input: &mut FieldReader<R>, skip: bool) -> PwatResult<DataChunk> {
        self.expect(RecordPhase::Data, "data read outside record data")?;
        loop {
            let field = self.next_field(input, "stream ended inside record data", skip)?;
            match field.ftype {
                rec::DATA | rec::LASTDATA => {
                    if field.len == 0 {
                        return Err(PwatError::BadRecord("empty data chunk".into()));
                    }
                    let last = field.ftype == rec::LASTDATA;
                    if last {
                        self.phase = RecordPhase::PostData;
                    }
                    return Ok(DataChunk {
                        data: field.data,
                        len: field.len,
                        last,
                    });
                }
                t if rec::is_predata(t) => trace!(ftype = t, "skipping reserved pre-data field"),
                t => {
                    return Err(PwatError::BadRecord(format!(
                        "field type {t:#04x} where a data chunk was expected"
                    )))
                }
            }
        }
    }

    /// Read post-data into `record` up to and including END.
    pub fn read_post<R: Read>(&mut self, input: &mut FieldReader<R>, record: &mut AttachmentRecord) -> PwatResult<()> {
        self.expect(RecordPhase::PostData, "post-data read before the last chunk")?;
        loop {
            let field = self.next_field(input, "stream ended inside record post-data", false)?;
            if !rec::is_postdata(field.ftype) {
                return Err(PwatError::BadRecord(format!(
                    "field type {:#04x} in post-data",
                    field.ftype
                )));
            }
            match field.ftype {
                rec::CMPSIZE => record.cmpsize = u32_field(&field)?,
                rec::CRC => record.crc = u32_field(&field)?,
                rec::ODIGEST => record.odigest = digest_field(&field)?,
                rec::CDIGEST => record.cdigest = digest_field(&field)?,
                rec::END => break,
                other => trace!(ftype = other, "ignoring unknown post-data field"),
            }
        }
        self.end_record();
        Ok(())
    }

    fn next_field<R: Read>(
        &mut self,
        input: &mut FieldReader<R>,
        ended: &str,
        skip_data: bool,
    ) -> PwatResult<Field> {
        match input.read_field(skip_data, &[rec::DATA, rec::LASTDATA])? {
            FieldRead::Field(field) => {
                self.observe(field.ftype)?;
                Ok(field)
            }
            FieldRead::End => Err(PwatError::BadRecord(ended.into())),
        }
    }
}

fn uuid_field(field: &Field) -> PwatResult<Uuid> {
    Uuid::from_slice(field.bytes()).map_err(|_| bad_width(field))
}

fn u8_field(field: &Field) -> PwatResult<u8> {
    match field.bytes() {
        [b] => Ok(*b),
        _ => Err(bad_width(field)),
    }
}

fn u32_field(field: &Field) -> PwatResult<u32> {
    <[u8; 4]>::try_from(field.bytes())
        .map(u32::from_le_bytes)
        .map_err(|_| bad_width(field))
}

/// 64-bit, or 32-bit from older writers
fn time_field(field: &Field) -> PwatResult<i64> {
    match field.bytes() {
        b if b.len() == 8 => <[u8; 8]>::try_from(b)
            .map(i64::from_le_bytes)
            .map_err(|_| bad_width(field)),
        b if b.len() == 4 => <[u8; 4]>::try_from(b)
            .map(|v| i32::from_le_bytes(v) as i64)
            .map_err(|_| bad_width(field)),
        _ => Err(bad_width(field)),
    }
}

fn digest_field(field: &Field) -> PwatResult<[u8; SHA1_LEN]> {
    <[u8; SHA1_LEN]>::try_from(field.bytes()).map_err(|_| bad_width(field))
}

fn string_field(field: &Field) -> PwatResult<String> {
    String::from_utf8(field.bytes().to_vec())
        .map_err(|_| PwatError::BadRecord(format!("field type {:#04x} is not UTF-8", field.ftype)))
}

fn bad_width(field: &Field) -> PwatError {
    PwatError::BadRecord(format!(
        "field type {:#04x} has unexpected length {}",
        field.ftype, field.len
    ))
}
