//! NIfTI-1 single-file reader (`.nii`, `.nii.gz`).
//!
//! NIfTI stores x fastest, then y, z and t, which is exactly C order for
//! `(z, y, x)`; a fourth axis is moved to the channel position.

use std::fs;
use std::io::Read;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::read::MultiGzDecoder;

use super::VolumeReader;
use crate::tensor::voxel_count;
use crate::{DecodedVolume, Result, VoxelData, VoxelError};

const HEADER_SIZE: usize = 348;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

mod offsets {
    pub const SIZEOF_HDR: usize = 0;
    pub const DIM: usize = 40;
    pub const DATATYPE: usize = 70;
    pub const PIXDIM: usize = 76;
    pub const VOX_OFFSET: usize = 108;
    pub const MAGIC: usize = 344;
}

pub struct NiftiReader;

impl VolumeReader for NiftiReader {
    fn name(&self) -> &'static str {
        "nifti1"
    }

    fn suffixes(&self) -> &'static [&'static str] {
        &[".nii", ".nii.gz"]
    }

    fn sniff(&self, head: &[u8]) -> bool {
        head.len() >= HEADER_SIZE
            && (LittleEndian::read_i32(&head[..4]) == HEADER_SIZE as i32
                || BigEndian::read_i32(&head[..4]) == HEADER_SIZE as i32)
            && &head[offsets::MAGIC..offsets::MAGIC + 4] == b"n+1\0"
    }

    fn read(&self, path: &Path) -> Result<DecodedVolume> {
        let raw = fs::read(path)?;
        let bytes = if raw.starts_with(&GZIP_MAGIC) {
            let mut out = Vec::new();
            MultiGzDecoder::new(raw.as_slice())
                .read_to_end(&mut out)
                .map_err(|e| VoxelError::Decode(format!("gzip: {e}")))?;
            out
        } else {
            raw
        };
        parse(&bytes)
    }
}

pub(crate) fn parse(bytes: &[u8]) -> Result<DecodedVolume> {
    if bytes.len() < HEADER_SIZE {
        return Err(VoxelError::Decode(format!(
            "NIfTI header too short: {} bytes",
            bytes.len()
        )));
    }

    let sizeof_hdr = &bytes[offsets::SIZEOF_HDR..offsets::SIZEOF_HDR + 4];
    if LittleEndian::read_i32(sizeof_hdr) == HEADER_SIZE as i32 {
        parse_with::<LittleEndian>(bytes)
    } else if BigEndian::read_i32(sizeof_hdr) == HEADER_SIZE as i32 {
        parse_with::<BigEndian>(bytes)
    } else {
        Err(VoxelError::Decode("not a NIfTI-1 header".into()))
    }
}

fn parse_with<E: ByteOrder>(bytes: &[u8]) -> Result<DecodedVolume> {
    let magic = &bytes[offsets::MAGIC..offsets::MAGIC + 4];
    if magic != b"n+1\0" {
        return Err(VoxelError::Decode(format!(
            "unsupported NIfTI magic {magic:?} (only single-file n+1)"
        )));
    }

    let ndim = E::read_i16(&bytes[offsets::DIM..offsets::DIM + 2]);
    if !(1..=7).contains(&ndim) {
        return Err(VoxelError::Decode(format!("ndim must be 1..=7, got {ndim}")));
    }
    let ndim = ndim as usize;

    let mut dim = [1usize; 8];
    for (i, slot) in dim.iter_mut().enumerate().skip(1).take(ndim) {
        let at = offsets::DIM + i * 2;
        let v = E::read_i16(&bytes[at..at + 2]);
        if v < 1 {
            return Err(VoxelError::Decode(format!("dim[{i}] = {v}")));
        }
        *slot = v as usize;
    }
    if dim[5..=7].iter().any(|&d| d > 1) {
        let rank = (1..=7).rev().find(|&i| dim[i] > 1).unwrap_or(ndim);
        return Err(VoxelError::RankTooHigh { rank });
    }

    let mut pixdim = [1.0f32; 4];
    for (i, slot) in pixdim.iter_mut().enumerate().skip(1) {
        let at = offsets::PIXDIM + i * 4;
        *slot = E::read_f32(&bytes[at..at + 4]).abs();
    }

    let (nx, ny, nz, nt) = (dim[1], dim[2], dim[3], dim[4]);
    let count = voxel_count(&[nx, ny, nz, nt])?;

    let vox_offset = E::read_f32(&bytes[offsets::VOX_OFFSET..offsets::VOX_OFFSET + 4]);
    let start = if vox_offset.is_finite() && vox_offset >= HEADER_SIZE as f32 {
        vox_offset as usize
    } else {
        HEADER_SIZE + 4
    };

    let code = E::read_i16(&bytes[offsets::DATATYPE..offsets::DATATYPE + 2]);
    let data = read_payload::<E>(code, &bytes[start.min(bytes.len())..], count)?;

    let (shape, spacing, data) = if nt > 1 {
        (
            vec![nz, ny, nx, nt],
            vec![pixdim[3], pixdim[2], pixdim[1]],
            data.channels_last(nx * ny * nz, nt),
        )
    } else {
        match ndim {
            1 => (vec![nx], vec![pixdim[1]], data),
            2 => (vec![ny, nx], vec![pixdim[2], pixdim[1]], data),
            _ => (vec![nz, ny, nx], vec![pixdim[3], pixdim[2], pixdim[1]], data),
        }
    };

    Ok(DecodedVolume { shape, spacing, data })
}

fn read_payload<E: ByteOrder>(code: i16, payload: &[u8], count: usize) -> Result<VoxelData> {
    let size = match code {
        2 | 256 => 1,
        4 | 512 => 2,
        8 | 16 | 768 => 4,
        64 => 8,
        other => {
            return Err(VoxelError::Unsupported(format!("NIfTI datatype code {other}")));
        }
    };
    let needed = count
        .checked_mul(size)
        .ok_or_else(|| VoxelError::Decode(format!("NIfTI payload of {count} voxels overflows")))?;
    if payload.len() < needed {
        return Err(VoxelError::Decode(format!(
            "NIfTI payload truncated: need {needed} bytes, have {}",
            payload.len()
        )));
    }
    let payload = &payload[..needed];

    Ok(match code {
        2 => VoxelData::U8(payload.to_vec()),
        256 => VoxelData::I8(payload.iter().map(|&b| b as i8).collect()),
        4 => {
            let mut v = vec![0i16; count];
            E::read_i16_into(payload, &mut v);
            VoxelData::I16(v)
        }
        512 => {
            let mut v = vec![0u16; count];
            E::read_u16_into(payload, &mut v);
            VoxelData::U16(v)
        }
        8 => {
            let mut v = vec![0i32; count];
            E::read_i32_into(payload, &mut v);
            VoxelData::I32(v)
        }
        768 => {
            let mut v = vec![0u32; count];
            E::read_u32_into(payload, &mut v);
            VoxelData::U32(v)
        }
        16 => {
            let mut v = vec![0f32; count];
            E::read_f32_into(payload, &mut v);
            VoxelData::F32(v)
        }
        _ => {
            let mut v = vec![0f64; count];
            E::read_f64_into(payload, &mut v);
            VoxelData::F64(v)
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal little-endian NIfTI-1 image with i16 voxels.
    pub(crate) fn nifti_i16(dims: &[usize], pixdim: &[f32], data: &[i16]) -> Vec<u8> {
        let mut h = vec![0u8; HEADER_SIZE + 4];
        LittleEndian::write_i32(&mut h[0..4], HEADER_SIZE as i32);
        LittleEndian::write_i16(&mut h[40..42], dims.len() as i16);
        for (i, d) in dims.iter().enumerate() {
            let at = 42 + i * 2;
            LittleEndian::write_i16(&mut h[at..at + 2], *d as i16);
        }
        LittleEndian::write_i16(&mut h[70..72], 4);
        LittleEndian::write_i16(&mut h[72..74], 16);
        for (i, p) in pixdim.iter().enumerate() {
            let at = 80 + i * 4;
            LittleEndian::write_f32(&mut h[at..at + 4], *p);
        }
        LittleEndian::write_f32(&mut h[108..112], (HEADER_SIZE + 4) as f32);
        h[344..348].copy_from_slice(b"n+1\0");
        for v in data {
            h.extend_from_slice(&v.to_le_bytes());
        }
        h
    }

    #[test]
    fn test_parse_3d() {
        let data: Vec<i16> = (0..24).collect();
        let bytes = nifti_i16(&[4, 3, 2], &[0.5, 0.75, 2.0], &data);
        let vol = parse(&bytes).unwrap();
        assert_eq!(vol.shape, vec![2, 3, 4]);
        assert_eq!(vol.spacing, vec![2.0, 0.75, 0.5]);
        assert_eq!(vol.data, VoxelData::I16(data));
    }

    #[test]
    fn test_parse_2d() {
        let bytes = nifti_i16(&[3, 2], &[1.0, 1.0], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(parse(&bytes).unwrap().shape, vec![2, 3]);
    }

    #[test]
    fn test_time_axis_becomes_channel() {
        // 2 voxels, 2 frames: frame-major on disk
        let bytes = nifti_i16(&[2, 1, 1, 2], &[1.0; 4], &[1, 2, 10, 20]);
        let vol = parse(&bytes).unwrap();
        assert_eq!(vol.shape, vec![1, 1, 2, 2]);
        assert_eq!(vol.data, VoxelData::I16(vec![1, 10, 2, 20]));
    }

    #[test]
    fn test_five_dimensions_rejected() {
        let bytes = nifti_i16(&[1, 1, 1, 1, 2], &[1.0; 5], &[0, 0]);
        assert!(matches!(parse(&bytes), Err(VoxelError::RankTooHigh { rank: 5 })));
    }

    #[test]
    fn test_truncated_payload() {
        let mut bytes = nifti_i16(&[2, 2], &[1.0, 1.0], &[1, 2, 3, 4]);
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(parse(&bytes), Err(VoxelError::Decode(_))));
    }

    #[test]
    fn test_sniff() {
        let bytes = nifti_i16(&[1], &[1.0], &[0]);
        assert!(NiftiReader.sniff(&bytes));
        assert!(!NiftiReader.sniff(b"\x93NUMPY"));
    }
}
