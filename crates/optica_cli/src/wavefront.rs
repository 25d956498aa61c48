//! Wavefront OBJ text export.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use optica_core::Mesh;

/// Write `mesh` as OBJ. Normals are written when the mesh has them.
pub fn write_obj<W: Write>(mesh: &Mesh, name: &str, out: &mut W) -> io::Result<()> {
    writeln!(out, "o {}", name)?;
    for p in &mesh.positions {
        writeln!(out, "v {} {} {}", p.x, p.y, p.z)?;
    }
    let normals = mesh.normals.as_deref().filter(|n| n.len() == mesh.positions.len());
    if let Some(normals) = normals {
        for n in normals {
            writeln!(out, "vn {} {} {}", n.x, n.y, n.z)?;
        }
    }
    // OBJ indices are 1-based
    for face in mesh.indices.chunks_exact(3) {
        let [a, b, c] = [face[0] + 1, face[1] + 1, face[2] + 1];
        if normals.is_some() {
            writeln!(out, "f {a}//{a} {b}//{b} {c}//{c}")?;
        } else {
            writeln!(out, "f {a} {b} {c}")?;
        }
    }
    Ok(())
}

pub fn save_obj(mesh: &Mesh, name: &str, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write_obj(mesh, name, &mut out)
        .and_then(|_| out.flush())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!(
        "Wrote {} ({} vertices, {} triangles)",
        path.display(),
        mesh.vertex_count(),
        mesh.triangle_count()
    );
    Ok(())
}
