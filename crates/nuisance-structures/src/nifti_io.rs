// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
NIfTI-1 reading and writing.

Reading goes through the `nifti` crate (`.nii` and `.nii.gz` are detected
from the file). Writing emits a single-file NIfTI-1 header followed by the
voxel data in Fortran order, gzip-compressed when the path ends in `.gz`.
*/

use crate::affine::Affine;
use crate::error::{ImagingError, ImagingResult};
use crate::image::{Image, ImageHeader, VoxelType};
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{ArrayD, IxDyn};
use nifti::volume::ndarray::IntoNdArray;
use nifti::{NiftiHeader, NiftiObject, ReaderOptions};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

const HEADER_SIZE: usize = 348;
const VOX_OFFSET: usize = 352;

/// `xyzt_units` code for millimetres and seconds
const UNITS_MM_SEC: u8 = 2 | 8;

/// Load a 3-D or 4-D image. Trailing singleton dimensions beyond the fourth
/// are dropped; the affine is validated before returning.
pub fn load_image(path: impl AsRef<Path>) -> ImagingResult<Image> {
    let path = path.as_ref();
    let load_err = |reason: String| ImagingError::Load {
        path: path.to_path_buf(),
        reason,
    };

    let object = ReaderOptions::new()
        .read_file(path)
        .map_err(|e| load_err(e.to_string()))?;
    let header = object.header().clone();
    // Whole-volume read with scl_slope/scl_inter applied. The array is
    // walked in logical order so its memory layout does not matter.
    let volume = object
        .into_volume()
        .into_ndarray::<f64>()
        .map_err(|e| load_err(e.to_string()))?;

    let mut dims: Vec<usize> = volume.shape().to_vec();
    while dims.len() > 4 && dims.last() == Some(&1) {
        dims.pop();
    }
    while dims.len() < 3 {
        dims.push(1);
    }
    if dims.len() > 4 {
        return Err(ImagingError::InvalidDimensionality {
            ndim: dims.len(),
            shape: dims,
        });
    }

    let values: Vec<f64> = volume.iter().copied().collect();
    let data = ArrayD::from_shape_vec(IxDyn(&dims), values)
        .map_err(|e| load_err(e.to_string()))?;

    let affine = header_affine(&header);
    affine.validate().map_err(|e| load_err(e.to_string()))?;

    let datatype = VoxelType::from_nifti_code(header.datatype as i16)
        .unwrap_or(VoxelType::Float32);
    let repetition_time = if dims.len() == 4 {
        repetition_time_from_header(&header)
    } else {
        None
    };
    debug!(
        target: "nuisance-structures",
        "[NIFTI] Loaded {} with shape {:?}",
        path.display(),
        dims
    );
    Image::new(
        data,
        affine,
        ImageHeader {
            datatype,
            repetition_time,
        },
    )
}

/// Write an image. The header datatype decides the on-disk voxel type.
pub fn save_image(image: &Image, path: impl AsRef<Path>) -> ImagingResult<()> {
    let path = path.as_ref();
    let bytes = encode_nifti(image);
    let file = File::create(path).map_err(|e| ImagingError::Save {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut writer = BufWriter::new(file);
    let gzip = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if gzip {
        let mut encoder = GzEncoder::new(writer, Compression::default());
        encoder.write_all(&bytes)?;
        encoder.finish()?.flush()?;
    } else {
        writer.write_all(&bytes)?;
        writer.flush()?;
    }
    debug!(
        target: "nuisance-structures",
        "[NIFTI] Wrote {} ({} bytes uncompressed)",
        path.display(),
        bytes.len()
    );
    Ok(())
}

/// sform when present, then qform, then a plain scaling from pixdim.
fn header_affine(header: &NiftiHeader) -> Affine {
    let pixdim: Vec<f64> = header.pixdim.iter().map(|&v| v as f64).collect();
    if header.sform_code as i16 > 0 {
        let row = |r: &[f32; 4]| [r[0] as f64, r[1] as f64, r[2] as f64, r[3] as f64];
        return Affine::from_rows([
            row(&header.srow_x),
            row(&header.srow_y),
            row(&header.srow_z),
            [0.0, 0.0, 0.0, 1.0],
        ]);
    }
    if header.qform_code as i16 > 0 {
        let (b, c, d) = (
            header.quatern_b as f64,
            header.quatern_c as f64,
            header.quatern_d as f64,
        );
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let qfac = if pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let rotation = [
            [
                a * a + b * b - c * c - d * d,
                2.0 * (b * c - a * d),
                2.0 * (b * d + a * c),
            ],
            [
                2.0 * (b * c + a * d),
                a * a + c * c - b * b - d * d,
                2.0 * (c * d - a * b),
            ],
            [
                2.0 * (b * d - a * c),
                2.0 * (c * d + a * b),
                a * a + d * d - b * b - c * c,
            ],
        ];
        let zooms = [pixdim[1], pixdim[2], pixdim[3] * qfac];
        let offsets = [
            header.quatern_x as f64,
            header.quatern_y as f64,
            header.quatern_z as f64,
        ];
        let mut rows = [[0.0; 4]; 4];
        for r in 0..3 {
            for c in 0..3 {
                rows[r][c] = rotation[r][c] * zooms[c];
            }
            rows[r][3] = offsets[r];
        }
        rows[3][3] = 1.0;
        return Affine::from_rows(rows);
    }
    Affine::from_zooms([pixdim[1], pixdim[2], pixdim[3]], [0.0, 0.0, 0.0])
}

/// `pixdim[4]` converted to seconds using the time bits of `xyzt_units`.
fn repetition_time_from_header(header: &NiftiHeader) -> Option<f64> {
    let raw = header.pixdim[4] as f64;
    if !raw.is_finite() || raw <= 0.0 {
        return None;
    }
    let scale = match (header.xyzt_units as u8) & 0x38 {
        16 => 1e-3,
        24 => 1e-6,
        _ => 1.0,
    };
    Some(raw * scale)
}

fn put_i16(buf: &mut [u8], offset: usize, value: i16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_f32(buf: &mut [u8], offset: usize, value: f32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Serialise to uncompressed single-file NIfTI-1 bytes.
fn encode_nifti(image: &Image) -> Vec<u8> {
    let datatype = image.header().datatype;
    let shape = image.shape();
    let zooms = image.zooms();
    let rows = image.affine().to_rows();

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&(HEADER_SIZE as i32).to_le_bytes());

    let mut dim = [1i16; 8];
    dim[0] = shape.len() as i16;
    for (axis, &extent) in shape.iter().enumerate() {
        dim[axis + 1] = extent as i16;
    }
    for (i, &d) in dim.iter().enumerate() {
        put_i16(&mut header, 40 + i * 2, d);
    }
    put_i16(&mut header, 70, datatype.nifti_code());
    put_i16(&mut header, 72, datatype.bits_per_voxel());

    let tr = image.header().repetition_time.unwrap_or(1.0);
    let pixdim = [1.0, zooms[0], zooms[1], zooms[2], tr, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        put_f32(&mut header, 76 + i * 4, p as f32);
    }
    put_f32(&mut header, 108, VOX_OFFSET as f32);
    put_f32(&mut header, 112, 1.0);
    header[123] = UNITS_MM_SEC;

    // sform_code = 1 (scanner)
    put_i16(&mut header, 254, 1);
    for (r, row) in rows.iter().take(3).enumerate() {
        for (c, &value) in row.iter().enumerate() {
            put_f32(&mut header, 280 + r * 16 + c * 4, value as f32);
        }
    }
    header[344..348].copy_from_slice(b"n+1\0");

    let bytes_per_voxel = datatype.bits_per_voxel() as usize / 8;
    let mut buffer = Vec::with_capacity(VOX_OFFSET + image.data().len() * bytes_per_voxel);
    buffer.extend_from_slice(&header);
    buffer.extend_from_slice(&[0u8; VOX_OFFSET - HEADER_SIZE]);

    // NIfTI stores the first axis fastest
    let fortran = image.data().view().reversed_axes();
    for &value in fortran.iter() {
        match datatype {
            VoxelType::Uint8 => buffer.push(value.round().clamp(0.0, 255.0) as u8),
            VoxelType::Int16 => buffer.extend_from_slice(
                &(value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16).to_le_bytes(),
            ),
            VoxelType::Int32 => buffer.extend_from_slice(
                &(value.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32).to_le_bytes(),
            ),
            VoxelType::Float32 => buffer.extend_from_slice(&(value as f32).to_le_bytes()),
            VoxelType::Float64 => buffer.extend_from_slice(&value.to_le_bytes()),
        }
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_series() -> Image {
        let data = ArrayD::from_shape_fn(IxDyn(&[3, 4, 2, 5]), |idx| {
            (idx[0] + 3 * idx[1] + 12 * idx[2]) as f64 + 0.25 * idx[3] as f64
        });
        let header = ImageHeader {
            datatype: VoxelType::Float32,
            repetition_time: Some(2.0),
        };
        Image::new(
            data,
            Affine::from_zooms([3.0, 3.0, 4.0], [-90.0, -126.0, -72.0]),
            header,
        )
        .unwrap()
    }

    #[test]
    fn test_gzip_file_reloads_with_same_grid_and_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bold.nii.gz");
        let image = sample_series();
        save_image(&image, &path).unwrap();

        let loaded = load_image(&path).unwrap();
        assert_eq!(loaded.shape(), image.shape());
        assert!(loaded.same_grid(&image));
        assert_eq!(loaded.header().repetition_time, Some(2.0));
        assert_eq!(loaded.data()[[2, 3, 1, 4]], image.data()[[2, 3, 1, 4]]);
    }

    #[test]
    fn test_every_voxel_reloads_in_axis_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bold.nii");
        let image = sample_series();
        save_image(&image, &path).unwrap();

        let loaded = load_image(&path).unwrap();
        assert_eq!(loaded.data(), image.data());
        // x varies fastest on disk, so a transposed read would break this
        assert_eq!(loaded.data()[[1, 0, 0, 0]], 1.0);
        assert_eq!(loaded.data()[[0, 1, 0, 0]], 3.0);
        assert_eq!(loaded.data()[[0, 0, 1, 3]], 12.75);
    }

    #[test]
    fn test_uint8_mask_written_as_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mask.nii");
        let data = ArrayD::from_shape_fn(IxDyn(&[2, 2, 2]), |idx| (idx[0] == idx[1]) as u8 as f64);
        let mask = Image::new(
            data,
            Affine::identity(),
            ImageHeader::with_datatype(VoxelType::Uint8),
        )
        .unwrap();
        save_image(&mask, &path).unwrap();

        let size = std::fs::metadata(&path).unwrap().len() as usize;
        assert_eq!(size, VOX_OFFSET + 8);
        let loaded = load_image(&path).unwrap();
        assert_eq!(loaded.header().datatype, VoxelType::Uint8);
        assert_eq!(loaded.data(), mask.data());
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let result = load_image("/definitely/not/here.nii.gz");
        assert!(matches!(result, Err(ImagingError::Load { .. })));
    }
}
