//! Model and texture loading
//!
//! OBJ geometry is read with `tobj` and PNG textures with `image`. Both produce plain CPU-side
//! data that the engine uploads through the staging path.

use nalgebra::Vector3;
use std::path::Path;
use thiserror::Error;

use crate::render::mesh::{MeshData, Vertex};

/// Asset loading errors
#[derive(Error, Debug)]
pub enum AssetError {
    /// The OBJ file could not be read or parsed
    #[error("Failed to load model '{path}': {reason}")]
    Model {
        /// File that failed
        path: String,
        /// Parser message
        reason: String,
    },

    /// The image file could not be read or decoded
    #[error("Failed to load texture '{path}': {reason}")]
    Texture {
        /// File that failed
        path: String,
        /// Decoder message
        reason: String,
    },

    /// The file parsed but contains nothing drawable
    #[error("Model '{0}' contains no triangles")]
    Empty(String),
}

/// Tightly packed RGBA8 pixels ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// `width * height * 4` bytes, row-major, top row first
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Checkerboard of `cells` x `cells` squares alternating between two colors
    pub fn checker(size: u32, cells: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let cell = (size / cells.max(1)).max(1);
        let pixels = (0..size)
            .flat_map(|y| (0..size).map(move |x| if (x / cell + y / cell) % 2 == 0 { a } else { b }))
            .flatten()
            .collect();
        Self {
            width: size,
            height: size,
            pixels,
        }
    }

    /// Grey checker used when no texture is configured
    pub fn default_checker() -> Self {
        Self::checker(64, 8, [200, 200, 200, 255], [90, 90, 90, 255])
    }

    /// Decode a PNG (or any format the `image` build supports) into RGBA8
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let rgba = image::open(path)
            .map_err(|e| AssetError::Texture {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
            .to_rgba8();
        let (width, height) = rgba.dimensions();

        log::info!("Loaded texture {}x{} from {}", width, height, path.display());
        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }
}

/// Load every model of an OBJ file into a single triangle list.
///
/// Faces are triangulated, texture V is flipped for Vulkan, and smooth normals are generated
/// when the file has none.
pub fn load_obj(path: impl AsRef<Path>) -> Result<MeshData, AssetError> {
    let path = path.as_ref();
    let (models, _materials) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS).map_err(|e| AssetError::Model {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut mesh = MeshData::default();
    for model in &models {
        append_model(&mut mesh, &model.mesh);
    }

    if mesh.indices.is_empty() {
        return Err(AssetError::Empty(path.display().to_string()));
    }
    mesh.validate().map_err(|reason| AssetError::Model {
        path: path.display().to_string(),
        reason,
    })?;

    log::info!(
        "Loaded {} model(s) from {}: {} vertices, {} triangles",
        models.len(),
        path.display(),
        mesh.vertices.len(),
        mesh.indices.len() / 3
    );
    Ok(mesh)
}

fn append_model(mesh: &mut MeshData, source: &tobj::Mesh) {
    let base = mesh.vertices.len() as u32;
    let first_vertex = mesh.vertices.len();
    let has_normals = !source.normals.is_empty();

    for (i, position) in source.positions.chunks_exact(3).enumerate() {
        let normal = if has_normals {
            [source.normals[3 * i], source.normals[3 * i + 1], source.normals[3 * i + 2]]
        } else {
            [0.0; 3]
        };
        let texcoord = source
            .texcoords
            .get(2 * i..2 * i + 2)
            .map_or([0.0, 0.0], |uv| [uv[0], 1.0 - uv[1]]);

        mesh.vertices.push(Vertex::new([position[0], position[1], position[2]], normal, texcoord));
    }
    mesh.indices.extend(source.indices.iter().map(|i| base + i));

    if !has_normals {
        let first_index = mesh.indices.len() - source.indices.len();
        generate_normals(mesh, first_vertex, first_index);
    }
}

/// Area-weighted smooth normals for the vertices from `first_vertex` on
fn generate_normals(mesh: &mut MeshData, first_vertex: usize, first_index: usize) {
    let mut sums = vec![Vector3::<f32>::zeros(); mesh.vertices.len() - first_vertex];

    for tri in mesh.indices[first_index..].chunks_exact(3) {
        let p = |i: u32| Vector3::from(mesh.vertices[i as usize].position);
        let face = (p(tri[1]) - p(tri[0])).cross(&(p(tri[2]) - p(tri[0])));
        for &i in tri {
            sums[i as usize - first_vertex] += face;
        }
    }

    for (vertex, sum) in mesh.vertices[first_vertex..].iter_mut().zip(sums) {
        let n = sum.try_normalize(f32::EPSILON).unwrap_or_else(Vector3::y);
        vertex.normal = [n.x, n.y, n.z];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::path::PathBuf;

    fn write_temp(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("pbr_engine_{}_{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_checker_pattern() {
        let texture = TextureData::checker(4, 2, [255, 0, 0, 255], [0, 0, 255, 255]);
        assert_eq!(texture.pixels.len(), 4 * 4 * 4);
        assert_eq!(&texture.pixels[0..4], &[255, 0, 0, 255]);
        // Third pixel of the first row starts the second cell.
        assert_eq!(&texture.pixels[8..12], &[0, 0, 255, 255]);
        // First pixel of the third row is in the second cell row.
        assert_eq!(&texture.pixels[32..36], &[0, 0, 255, 255]);
    }

    #[test]
    fn test_load_quad_without_normals() {
        let path = write_temp(
            "quad.obj",
            b"v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\nf 1/1 2/2 3/3 4/4\n",
        );
        let mesh = load_obj(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(mesh.indices.len(), 6);
        mesh.validate().unwrap();
        for vertex in &mesh.vertices {
            assert_relative_eq!(vertex.normal[2], 1.0);
        }
        let origin = mesh.vertices.iter().find(|v| v.position == [0.0, 0.0, 0.0]).unwrap();
        assert_relative_eq!(origin.texcoord[1], 1.0);
    }

    #[test]
    fn test_multiple_objects_are_concatenated() {
        let path = write_temp(
            "two.obj",
            b"o a\nv 0 0 0\nv 1 0 0\nv 0 1 0\nvn 0 0 1\nf 1//1 2//1 3//1\n\
              o b\nv 0 0 1\nv 1 0 1\nv 0 1 1\nf 4//1 5//1 6//1\n",
        );
        let mesh = load_obj(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(mesh.indices.len(), 6);
        assert_eq!(mesh.vertices.len(), 6);
        assert!(mesh.indices[3..].iter().all(|&i| i >= 3));
    }

    #[test]
    fn test_missing_model_reports_path() {
        let err = load_obj("does/not/exist.obj").unwrap_err();
        assert!(err.to_string().contains("does/not/exist.obj"));
    }

    #[test]
    fn test_load_png() {
        let mut encoded = Vec::new();
        let pixels = image::RgbaImage::from_raw(2, 1, vec![255, 0, 0, 255, 0, 255, 0, 128]).unwrap();
        pixels
            .write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageFormat::Png)
            .unwrap();
        let path = write_temp("tex.png", &encoded);

        let texture = TextureData::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!((texture.width, texture.height), (2, 1));
        assert_eq!(texture.pixels, vec![255, 0, 0, 255, 0, 255, 0, 128]);
    }

    #[test]
    fn test_invalid_png_rejected() {
        let path = write_temp("bad.png", b"not a png");
        let result = TextureData::load(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(AssetError::Texture { .. })));
    }
}
