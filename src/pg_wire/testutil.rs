//! Client-side frame builders and a backend frame parser for tests.

/// Frame a typed frontend message: type byte + length + body.
pub fn frame(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 5);
    out.push(msg_type);
    out.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn cstr(body: &mut Vec<u8>, s: &str) {
    body.extend_from_slice(s.as_bytes());
    body.push(0);
}

/// An untyped startup frame with protocol 3.0 and the given parameters.
pub fn startup_frame(parameters: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&196_608u32.to_be_bytes());
    for (name, value) in parameters {
        cstr(&mut body, name);
        cstr(&mut body, value);
    }
    body.push(0);

    let mut out = Vec::with_capacity(body.len() + 4);
    out.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

pub fn ssl_request_frame() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&8u32.to_be_bytes());
    out.extend_from_slice(&80_877_103u32.to_be_bytes());
    out
}

pub fn query_frame(sql: &str) -> Vec<u8> {
    let mut body = Vec::new();
    cstr(&mut body, sql);
    frame(b'Q', &body)
}

pub fn parse_frame(name: &str, sql: &str, parameter_oids: &[u32]) -> Vec<u8> {
    let mut body = Vec::new();
    cstr(&mut body, name);
    cstr(&mut body, sql);
    body.extend_from_slice(&(parameter_oids.len() as i16).to_be_bytes());
    for oid in parameter_oids {
        body.extend_from_slice(&oid.to_be_bytes());
    }
    frame(b'P', &body)
}

pub fn bind_frame(
    portal: &str,
    statement: &str,
    format_codes: &[i16],
    parameters: &[Option<&[u8]>],
) -> Vec<u8> {
    let mut body = Vec::new();
    cstr(&mut body, portal);
    cstr(&mut body, statement);
    body.extend_from_slice(&(format_codes.len() as i16).to_be_bytes());
    for code in format_codes {
        body.extend_from_slice(&code.to_be_bytes());
    }
    body.extend_from_slice(&(parameters.len() as i16).to_be_bytes());
    for parameter in parameters {
        match parameter {
            None => body.extend_from_slice(&(-1i32).to_be_bytes()),
            Some(bytes) => {
                body.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                body.extend_from_slice(bytes);
            }
        }
    }
    body.extend_from_slice(&0i16.to_be_bytes());
    frame(b'B', &body)
}

pub fn describe_frame(target: u8, name: &str) -> Vec<u8> {
    let mut body = vec![target];
    cstr(&mut body, name);
    frame(b'D', &body)
}

pub fn execute_frame(portal: &str, max_rows: i32) -> Vec<u8> {
    let mut body = Vec::new();
    cstr(&mut body, portal);
    body.extend_from_slice(&max_rows.to_be_bytes());
    frame(b'E', &body)
}

pub fn sync_frame() -> Vec<u8> {
    frame(b'S', &[])
}

pub fn close_frame(target: u8, name: &str) -> Vec<u8> {
    let mut body = vec![target];
    cstr(&mut body, name);
    frame(b'C', &body)
}

pub fn password_frame(password: &str) -> Vec<u8> {
    let mut body = Vec::new();
    cstr(&mut body, password);
    frame(b'p', &body)
}

pub fn terminate_frame() -> Vec<u8> {
    frame(b'X', &[])
}

/// Split a raw byte stream of backend messages into (type, body) pairs.
pub fn parse_backend_frames(mut bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut frames = Vec::new();
    while bytes.len() >= 5 {
        let msg_type = bytes[0];
        let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        assert!(bytes.len() >= 1 + len, "truncated backend frame");
        frames.push((msg_type, bytes[5..1 + len].to_vec()));
        bytes = &bytes[1 + len..];
    }
    assert!(bytes.is_empty(), "trailing garbage after backend frames");
    frames
}

/// How many complete frames a (possibly partial) byte stream holds.
pub fn complete_frame_count(mut bytes: &[u8]) -> usize {
    let mut count = 0;
    while bytes.len() >= 5 {
        let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        if bytes.len() < 1 + len {
            break;
        }
        count += 1;
        bytes = &bytes[1 + len..];
    }
    count
}

/// Just the message type bytes, for ordering assertions.
pub fn backend_message_types(bytes: &[u8]) -> Vec<u8> {
    parse_backend_frames(bytes).into_iter().map(|(t, _)| t).collect()
}
