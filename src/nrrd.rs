//! Minimal reader for attached-header NRRD label volumes.

use std::{
    collections::HashMap,
    fs,
    io::Read,
    path::Path,
};

use flate2::read::GzDecoder;
use ndarray::{Array3, ShapeBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NrrdError {
    #[error("Missing NRRD magic line")]
    MissingMagic,

    #[error("NRRD header is not terminated by an empty line")]
    UnterminatedHeader,

    #[error("Missing NRRD header field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid value for NRRD header field '{field}': {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Only 3 dimensional volumes are supported, found {0}")]
    UnsupportedDimension(usize),

    #[error("Unsupported NRRD type '{0}'")]
    UnsupportedType(String),

    #[error("Unsupported NRRD encoding '{0}'")]
    UnsupportedEncoding(String),

    #[error("Expected {expected} bytes of voxel data, found {found}")]
    DataSize { expected: usize, found: usize },

    #[error("Label value {0} does not fit into an unsigned 16 bit label")]
    LabelOutOfRange(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NrrdType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
}

impl NrrdType {
    fn parse(value: &str) -> Result<Self, NrrdError> {
        let value = value.trim();
        Ok(match value {
            "signed char" | "int8" | "int8_t" => NrrdType::Int8,
            "uchar" | "unsigned char" | "uint8" | "uint8_t" => NrrdType::UInt8,
            "short" | "short int" | "signed short" | "signed short int" | "int16" | "int16_t" => {
                NrrdType::Int16
            }
            "ushort" | "unsigned short" | "unsigned short int" | "uint16" | "uint16_t" => {
                NrrdType::UInt16
            }
            "int" | "signed int" | "int32" | "int32_t" => NrrdType::Int32,
            "uint" | "unsigned int" | "uint32" | "uint32_t" => NrrdType::UInt32,
            other => return Err(NrrdError::UnsupportedType(other.to_string())),
        })
    }

    fn size(self) -> usize {
        match self {
            NrrdType::Int8 | NrrdType::UInt8 => 1,
            NrrdType::Int16 | NrrdType::UInt16 => 2,
            NrrdType::Int32 | NrrdType::UInt32 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Gzip,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NrrdHeader {
    pub data_type: NrrdType,
    pub sizes: [usize; 3],
    /// One direction per axis, `None` for non-spatial axes.
    pub space_directions: Option<Vec<Option<[f64; 3]>>>,
    pub space_origin: Option<[f64; 3]>,
    pub encoding: Encoding,
    pub big_endian: bool,
    pub fields: HashMap<String, String>,
}

impl NrrdHeader {
    fn parse(text: &str) -> Result<Self, NrrdError> {
        let mut lines = text.lines();
        if !lines.next().is_some_and(|magic| magic.starts_with("NRRD")) {
            return Err(NrrdError::MissingMagic);
        }

        let mut fields = HashMap::new();
        for line in lines {
            if line.starts_with('#') {
                continue;
            }
            // key/value pairs (`key:=value`) carry no geometry
            if line.contains(":=") {
                continue;
            }
            if let Some((key, value)) = line.split_once(": ") {
                fields.insert(key.trim().to_lowercase(), value.trim().to_string());
            }
        }

        let field = |name: &'static str| -> Result<&String, NrrdError> {
            fields.get(name).ok_or(NrrdError::MissingField(name))
        };

        let dimension_value = field("dimension")?;
        let dimension: usize = dimension_value
            .parse()
            .map_err(|_| NrrdError::InvalidField {
                field: "dimension",
                value: dimension_value.clone(),
            })?;
        if dimension != 3 {
            return Err(NrrdError::UnsupportedDimension(dimension));
        }

        let data_type = NrrdType::parse(field("type")?)?;

        let sizes_value = field("sizes")?;
        let sizes: Vec<usize> = sizes_value
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .map_err(|_| NrrdError::InvalidField {
                field: "sizes",
                value: sizes_value.clone(),
            })?;
        let sizes: [usize; 3] = sizes.try_into().map_err(|_| NrrdError::InvalidField {
            field: "sizes",
            value: sizes_value.clone(),
        })?;

        let encoding = match field("encoding")?.as_str() {
            "raw" => Encoding::Raw,
            "gzip" | "gz" => Encoding::Gzip,
            other => return Err(NrrdError::UnsupportedEncoding(other.to_string())),
        };

        let big_endian = fields.get("endian").is_some_and(|endian| endian == "big");

        let space_directions = fields
            .get("space directions")
            .map(|value| parse_directions(value))
            .transpose()?;
        let space_origin = fields
            .get("space origin")
            .map(|value| {
                parse_vector(value).ok_or_else(|| NrrdError::InvalidField {
                    field: "space origin",
                    value: value.clone(),
                })
            })
            .transpose()?;

        Ok(Self {
            data_type,
            sizes,
            space_directions,
            space_origin,
            encoding,
            big_endian,
            fields,
        })
    }

    /// Payload size in bytes, `None` if it does not fit in `usize`.
    pub fn data_len(&self) -> Option<usize> {
        self.sizes
            .iter()
            .try_fold(self.data_type.size(), |len, &size| len.checked_mul(size))
    }
}

/// Parse `(x,y,z) (x,y,z) none ...`.
fn parse_directions(value: &str) -> Result<Vec<Option<[f64; 3]>>, NrrdError> {
    let invalid = || NrrdError::InvalidField {
        field: "space directions",
        value: value.to_string(),
    };
    let mut directions = Vec::new();
    let mut rest = value.trim();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("none") {
            directions.push(None);
            rest = after.trim_start();
            continue;
        }
        let end = rest.find(')').ok_or_else(invalid)?;
        directions.push(Some(parse_vector(&rest[..=end]).ok_or_else(invalid)?));
        rest = rest[end + 1..].trim_start();
    }
    Ok(directions)
}

fn parse_vector(value: &str) -> Option<[f64; 3]> {
    let inner = value.trim().strip_prefix('(')?.strip_suffix(')')?;
    let components: Vec<f64> = inner
        .split(',')
        .map(|component| component.trim().parse().ok())
        .collect::<Option<_>>()?;
    components.try_into().ok()
}

/// Read an NRRD file with attached header into a volume indexed by NRRD
/// axis order (first axis fastest in the file).
pub fn read_nrrd(path: impl AsRef<Path>) -> Result<(NrrdHeader, Array3<u16>), NrrdError> {
    let bytes = fs::read(path.as_ref())?;
    read_nrrd_bytes(&bytes)
}

pub fn read_nrrd_bytes(bytes: &[u8]) -> Result<(NrrdHeader, Array3<u16>), NrrdError> {
    let (header_end, data_start) = find_header_end(bytes).ok_or(NrrdError::UnterminatedHeader)?;
    let header = NrrdHeader::parse(&String::from_utf8_lossy(&bytes[..header_end]))?;

    let payload = &bytes[data_start..];
    let data = match header.encoding {
        Encoding::Raw => payload.to_vec(),
        Encoding::Gzip => {
            let mut decoded = Vec::new();
            GzDecoder::new(payload).read_to_end(&mut decoded)?;
            decoded
        }
    };

    let expected = header.data_len().ok_or_else(|| NrrdError::InvalidField {
        field: "sizes",
        value: format!("{:?}", header.sizes),
    })?;
    if data.len() < expected {
        return Err(NrrdError::DataSize {
            expected,
            found: data.len(),
        });
    }
    // Raw data may be preceded by skipped bytes, the voxels sit at the end.
    let data = &data[data.len() - expected..];

    let labels = decode_labels(data, header.data_type, header.big_endian)?;
    let [x, y, z] = header.sizes;
    let volume = Array3::from_shape_vec((x, y, z).f(), labels)
        .map_err(|_| NrrdError::DataSize {
            expected,
            found: data.len(),
        })?
        .as_standard_layout()
        .into_owned();
    Ok((header, volume))
}

/// Start of the first empty header line and start of the payload after it.
/// Lines end in `\n` or `\r\n`.
fn find_header_end(bytes: &[u8]) -> Option<(usize, usize)> {
    let mut line_start = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        if byte != b'\n' {
            continue;
        }
        let line = &bytes[line_start..i];
        if line.is_empty() || line == b"\r" {
            return Some((line_start, i + 1));
        }
        line_start = i + 1;
    }
    None
}

fn decode_labels(
    data: &[u8],
    data_type: NrrdType,
    big_endian: bool,
) -> Result<Vec<u16>, NrrdError> {
    let check =
        |value: i64| u16::try_from(value).map_err(|_| NrrdError::LabelOutOfRange(value));
    match data_type {
        NrrdType::UInt8 => Ok(data.iter().map(|&v| u16::from(v)).collect()),
        NrrdType::Int8 => data.iter().map(|&v| check(i64::from(v as i8))).collect(),
        NrrdType::UInt16 => Ok(data
            .chunks_exact(2)
            .map(|c| {
                let bytes = [c[0], c[1]];
                if big_endian {
                    u16::from_be_bytes(bytes)
                } else {
                    u16::from_le_bytes(bytes)
                }
            })
            .collect()),
        NrrdType::Int16 => data
            .chunks_exact(2)
            .map(|c| {
                let bytes = [c[0], c[1]];
                let value = if big_endian {
                    i16::from_be_bytes(bytes)
                } else {
                    i16::from_le_bytes(bytes)
                };
                check(i64::from(value))
            })
            .collect(),
        NrrdType::Int32 | NrrdType::UInt32 => data
            .chunks_exact(4)
            .map(|c| {
                let bytes = [c[0], c[1], c[2], c[3]];
                let value = match (data_type, big_endian) {
                    (NrrdType::Int32, true) => i64::from(i32::from_be_bytes(bytes)),
                    (NrrdType::Int32, false) => i64::from(i32::from_le_bytes(bytes)),
                    (_, true) => i64::from(u32::from_be_bytes(bytes)),
                    (_, false) => i64::from(u32::from_le_bytes(bytes)),
                };
                check(value)
            })
            .collect(),
    }
}
