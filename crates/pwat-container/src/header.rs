//! Container header: the first fields of every stream, terminated by END.

use pwat_core::{ContainerHeader, FormatVersion, PwatError, PwatResult};
use std::io::{Read, Write};
use tracing::debug;
use uuid::Uuid;

use crate::field::{FieldRead, FieldReader, FieldWriter};
use crate::format::{hdr, CURRENT_VERSION};

pub fn write_header<W: Write>(out: &mut FieldWriter<W>, header: &ContainerHeader) -> PwatResult<()> {
    out.write_field(hdr::VERSION, &[header.version.minor, header.version.major])?;
    out.write_field(hdr::FILE_UUID, header.file_uuid.as_bytes())?;
    out.write_field(hdr::DB_UUID, header.db_uuid.as_bytes())?;
    out.write_field(hdr::LAST_SAVED_TIME, &header.last_saved.to_le_bytes())?;
    out.write_field(hdr::LAST_SAVED_USER, header.last_saved_by.as_bytes())?;
    out.write_field(hdr::LAST_SAVED_HOST, header.last_saved_on.as_bytes())?;
    out.write_field(hdr::LAST_SAVED_APP, header.last_saved_app.as_bytes())?;
    out.write_field(hdr::END, &[])
}

/// Read header fields up to END.
///
/// Only the major version has to match. Unknown field types are skipped and
/// are not carried into containers written later. `iterations` comes from
/// the envelope and is recorded in the returned header.
pub fn read_header<R: Read>(input: &mut FieldReader<R>, iterations: u32) -> PwatResult<ContainerHeader> {
    let mut version = None;
    let mut file_uuid = None;
    let mut db_uuid = None;
    let mut header = ContainerHeader {
        version: CURRENT_VERSION,
        file_uuid: Uuid::nil(),
        db_uuid: Uuid::nil(),
        last_saved: 0,
        last_saved_by: String::new(),
        last_saved_on: String::new(),
        last_saved_app: String::new(),
        iterations,
    };

    loop {
        let field = match input.read_field(false, &[])? {
            FieldRead::Field(field) => field,
            FieldRead::End => {
                return Err(PwatError::ContainerFormat("header is not terminated".into()))
            }
        };
        let data = field.bytes();
        match field.ftype {
            hdr::VERSION => {
                let [minor, major] = <[u8; 2]>::try_from(data).map_err(|_| {
                    PwatError::ContainerFormat(format!("version field of {} bytes", data.len()))
                })?;
                if major != CURRENT_VERSION.major {
                    return Err(PwatError::UnsupportedVersion { major, minor });
                }
                version = Some(FormatVersion { major, minor });
            }
            hdr::FILE_UUID => file_uuid = Some(uuid_field(data, "file uuid")?),
            hdr::DB_UUID => db_uuid = Some(uuid_field(data, "database uuid")?),
            hdr::LAST_SAVED_TIME => header.last_saved = time_field(data),
            hdr::LAST_SAVED_USER => header.last_saved_by = String::from_utf8_lossy(data).into_owned(),
            hdr::LAST_SAVED_HOST => header.last_saved_on = String::from_utf8_lossy(data).into_owned(),
            hdr::LAST_SAVED_APP => header.last_saved_app = String::from_utf8_lossy(data).into_owned(),
            hdr::END => break,
            other => debug!(ftype = other, len = field.len, "skipping unknown header field"),
        }
    }

    header.version =
        version.ok_or_else(|| PwatError::ContainerFormat("header has no version".into()))?;
    header.db_uuid =
        db_uuid.ok_or_else(|| PwatError::ContainerFormat("header has no database uuid".into()))?;
    header.file_uuid = file_uuid.unwrap_or_else(Uuid::nil);
    Ok(header)
}

fn uuid_field(data: &[u8], what: &str) -> PwatResult<Uuid> {
    Uuid::from_slice(data)
        .map_err(|_| PwatError::ContainerFormat(format!("{what} field of {} bytes", data.len())))
}

/// Timestamps are 64-bit; 32-bit values from older writers are accepted.
/// Any other width reads as 0.
fn time_field(data: &[u8]) -> i64 {
    match data.len() {
        8 => i64::from_le_bytes(data.try_into().unwrap_or_default()),
        4 => i32::from_le_bytes(data.try_into().unwrap_or_default()) as i64,
        _ => 0,
    }
}
