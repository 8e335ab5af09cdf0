use ring::digest::{Context, SHA256};
use std::io::Read;
use std::path::Path;

/// Hex SHA-256 of a file's contents, read in chunks.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut ctx = Context::new(&SHA256);
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.update(&buf[..n]);
    }
    Ok(hex::encode(ctx.finish().as_ref()))
}

/// Stable 16-char file stem for an arbitrary id (video ids are URLs).
pub fn short_id(id: &str) -> String {
    let digest = ring::digest::digest(&SHA256, id.as_bytes());
    hex::encode(&digest.as_ref()[..8])
}
