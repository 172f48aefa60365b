//! Custom multipart framing for the upload to the external file server
//! (spec.md §6). Hand-built rather than `reqwest::multipart::Form`
//! because the boundary template and the `Pragma: XMLMD5` header are
//! part of the external contract, not something a generic form builder
//! would reproduce byte-for-byte.

/// `----------7dcd52d09f4<unix-ms>----------` (spec.md §6).
pub fn boundary(unix_ms: u128) -> String {
    format!("----------7dcd52d09f4{unix_ms}----------")
}

/// Builds the full multipart body for a single file field.
pub fn build_body(boundary: &str, field_name: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field_name}\"; filename=\"{filename}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_matches_template() {
        assert_eq!(boundary(1700000000123), "----------7dcd52d09f41700000000123----------");
    }

    #[test]
    fn build_body_frames_name_and_filename() {
        let boundary = boundary(1);
        let body = build_body(&boundary, "file", "report.pdf", b"hello");
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("name=\"file\"; filename=\"report.pdf\""));
        assert!(text.starts_with(&format!("--{boundary}\r\n")));
        assert!(text.trim_end().ends_with(&format!("--{boundary}--")));
    }
}
