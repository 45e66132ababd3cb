//! NumPy `.npy` reader (format versions 1-3, C order only).

use std::fs;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::VolumeReader;
use crate::tensor::{payload_len, voxel_count};
use crate::{DType, DecodedVolume, Result, VoxelData, VoxelError};

const MAGIC: &[u8] = b"\x93NUMPY";

pub struct NpyReader;

impl VolumeReader for NpyReader {
    fn name(&self) -> &'static str {
        "npy"
    }

    fn suffixes(&self) -> &'static [&'static str] {
        &[".npy"]
    }

    fn sniff(&self, head: &[u8]) -> bool {
        head.starts_with(MAGIC)
    }

    fn read(&self, path: &Path) -> Result<DecodedVolume> {
        parse(&fs::read(path)?)
    }
}

struct NpyHeader {
    dtype: DType,
    big_endian: bool,
    shape: Vec<usize>,
}

pub(crate) fn parse(bytes: &[u8]) -> Result<DecodedVolume> {
    if !bytes.starts_with(MAGIC) || bytes.len() < 10 {
        return Err(VoxelError::Decode("missing NPY magic".into()));
    }
    let (header_len, header_start) = match bytes[6] {
        1 => (LittleEndian::read_u16(&bytes[8..10]) as usize, 10),
        2 | 3 if bytes.len() >= 12 => (LittleEndian::read_u32(&bytes[8..12]) as usize, 12),
        v => return Err(VoxelError::Unsupported(format!("NPY version {v}"))),
    };
    let header_end = header_start + header_len;
    if bytes.len() < header_end {
        return Err(VoxelError::Decode("NPY header truncated".into()));
    }
    let text = std::str::from_utf8(&bytes[header_start..header_end])
        .map_err(|e| VoxelError::Decode(format!("NPY header: {e}")))?;
    let header = parse_header(text)?;

    let count = voxel_count(&header.shape)?;
    let needed = payload_len(count, header.dtype)?;
    let payload = &bytes[header_end..];
    if payload.len() < needed {
        return Err(VoxelError::Decode(format!(
            "NPY payload truncated: need {needed} bytes, have {}",
            payload.len()
        )));
    }
    let payload = &payload[..needed];

    let data = if header.big_endian {
        decode::<BigEndian>(header.dtype, payload, count)
    } else {
        decode::<LittleEndian>(header.dtype, payload, count)
    };

    Ok(DecodedVolume {
        shape: header.shape,
        spacing: Vec::new(),
        data,
    })
}

fn parse_header(text: &str) -> Result<NpyHeader> {
    let descr = dict_value(text, "descr")
        .and_then(|v| v.trim().strip_prefix('\''))
        .and_then(|v| v.split('\'').next())
        .ok_or_else(|| VoxelError::Decode("NPY header has no descr".into()))?;

    if dict_value(text, "fortran_order").is_some_and(|v| v.trim_start().starts_with("True")) {
        return Err(VoxelError::Unsupported("Fortran-ordered NPY arrays".into()));
    }

    if descr.len() < 2 || !descr.is_ascii() {
        return Err(VoxelError::Decode(format!("NPY descr {descr:?}")));
    }
    let (order, kind) = descr.split_at(1);
    let big_endian = match order {
        "<" | "|" | "=" => false,
        ">" => true,
        _ => return Err(VoxelError::Decode(format!("NPY descr {descr}"))),
    };
    let dtype = match kind {
        "u1" | "b1" => DType::U8,
        "i1" => DType::I8,
        "i2" => DType::I16,
        "u2" => DType::U16,
        "i4" => DType::I32,
        "u4" => DType::U32,
        "f4" => DType::F32,
        "f8" => DType::F64,
        other => return Err(VoxelError::Unsupported(format!("NPY dtype {other}"))),
    };

    let shape_text = dict_value(text, "shape")
        .and_then(|v| v.trim_start().strip_prefix('('))
        .and_then(|v| v.split(')').next())
        .ok_or_else(|| VoxelError::Decode("NPY header has no shape".into()))?;
    let shape = shape_text
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|e| VoxelError::Decode(format!("NPY shape entry {s:?}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(NpyHeader { dtype, big_endian, shape })
}

/// Text following `'key':` in the header dict literal.
fn dict_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("'{key}':");
    text.find(&needle).map(|at| &text[at + needle.len()..])
}

fn decode<E: ByteOrder>(dtype: DType, payload: &[u8], count: usize) -> VoxelData {
    match dtype {
        DType::U8 => VoxelData::U8(payload.to_vec()),
        DType::I8 => VoxelData::I8(payload.iter().map(|&b| b as i8).collect()),
        DType::I16 => {
            let mut v = vec![0i16; count];
            E::read_i16_into(payload, &mut v);
            VoxelData::I16(v)
        }
        DType::U16 => {
            let mut v = vec![0u16; count];
            E::read_u16_into(payload, &mut v);
            VoxelData::U16(v)
        }
        DType::I32 => {
            let mut v = vec![0i32; count];
            E::read_i32_into(payload, &mut v);
            VoxelData::I32(v)
        }
        DType::U32 => {
            let mut v = vec![0u32; count];
            E::read_u32_into(payload, &mut v);
            VoxelData::U32(v)
        }
        DType::F32 => {
            let mut v = vec![0f32; count];
            E::read_f32_into(payload, &mut v);
            VoxelData::F32(v)
        }
        DType::F64 => {
            let mut v = vec![0f64; count];
            E::read_f64_into(payload, &mut v);
            VoxelData::F64(v)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Version 1 `.npy` bytes for a little-endian i16 array.
    pub(crate) fn npy_i16(shape: &[usize], data: &[i16]) -> Vec<u8> {
        let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
        let shape_lit = if dims.len() == 1 {
            format!("({},)", dims[0])
        } else {
            format!("({})", dims.join(", "))
        };
        let mut header =
            format!("{{'descr': '<i2', 'fortran_order': False, 'shape': {shape_lit}, }}");
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');

        let mut out = MAGIC.to_vec();
        out.extend_from_slice(&[1, 0]);
        out.extend_from_slice(&(header.len() as u16).to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        for v in data {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_parse_2d() {
        let bytes = npy_i16(&[2, 3], &[1, 2, 3, 4, 5, 6]);
        let vol = parse(&bytes).unwrap();
        assert_eq!(vol.shape, vec![2, 3]);
        assert!(vol.spacing.is_empty());
        assert_eq!(vol.data, VoxelData::I16(vec![1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn test_parse_1d_tuple() {
        let vol = parse(&npy_i16(&[4], &[9, 8, 7, 6])).unwrap();
        assert_eq!(vol.shape, vec![4]);
    }

    #[test]
    fn test_big_endian_f4() {
        let header = "{'descr': '>f4', 'fortran_order': False, 'shape': (2,), }\n";
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&1.5f32.to_be_bytes());
        bytes.extend_from_slice(&(-2.0f32).to_be_bytes());

        let vol = parse(&bytes).unwrap();
        assert_eq!(vol.data, VoxelData::F32(vec![1.5, -2.0]));
    }

    #[test]
    fn test_fortran_order_rejected() {
        let header = "{'descr': '<u1', 'fortran_order': True, 'shape': (1, 1), }\n";
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.push(0);
        assert!(matches!(parse(&bytes), Err(VoxelError::Unsupported(_))));
    }

    #[test]
    fn test_overflowing_shape_is_a_decode_error() {
        let header = "{'descr': '<i2', 'fortran_order': False, 'shape': (4294967296, 4294967296), }\n";
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&[0; 8]);
        assert!(matches!(parse(&bytes), Err(VoxelError::Decode(_))));
    }
}
