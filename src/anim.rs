//! Client for the animation frame service and `.mtb` clip directories.
//!
//! Animation curves are not decoded in-process. A helper service listens on
//! a fixed local port and evaluates frames on request; this module builds
//! its fixed-size requests, parses its replies, and reads the frame set
//! directory out of `.mtb` files so callers know what to ask for. Each
//! request is a little-endian opcode followed by a fixed payload, and every
//! reply echoes a paired opcode plus a status word.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;

use thiserror::Error;
use winnow::Parser;
use winnow::binary::le_f32;

use crate::cursor::{Cursor, WResult, record_error};
use crate::error::DecodeError;

/// Address the service listens on.
pub const SERVICE_ADDR: &str = "127.0.0.1:54217";

const OP_LOAD_FILE: u16 = 0x3330;
const OP_LOAD_FILE_ACK: u16 = 0x3331;
const OP_DECODE_FRAME: u16 = 0x3332;
const OP_DECODE_FRAME_ACK: u16 = 0x3333;

/// Size of the path field in a load request.
const PATH_FIELD_LEN: usize = 256;
const BONE_FRAME_LEN: usize = 0x30;
/// Translations and scales come back premultiplied by this factor.
const COORDINATE_SCALE: f32 = 10.0;

#[derive(Debug, Error)]
pub enum AnimError {
    #[error("animation service i/o failed")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("path does not fit the 256-byte request field")]
    PathTooLong,
    #[error("expected opcode {expected:#06X}, the service sent {got:#06X}")]
    UnexpectedOpcode { expected: u16, got: u16 },
    #[error("the service rejected the request (status {0})")]
    Server(u16),
    #[error("frame payload of {0} byte(s) is not a whole number of bone frames")]
    TruncatedPayload(usize),
}

/// One bone's pose inside a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BoneFrame {
    /// Rotation quaternion, `[x, y, z, w]`.
    pub rotation: [f32; 4],
    pub position: [f32; 3],
    pub scale: [f32; 3],
}

/// One frame set listed in a `.mtb` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FrameSet {
    /// Definition offset handed back to the service in decode requests.
    pub definition_offset: u32,
    pub frame_count: u16,
}

/// The frame sets of one clip file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FrameSetDirectory {
    pub sets: Vec<FrameSet>,
}

impl FrameSetDirectory {
    /// Read the two directory tables of a `.mtb` file: definition offsets
    /// from the first, frame counts from the second, paired by position.
    pub fn parse(data: &[u8]) -> Result<Self, AnimError> {
        let mut cursor = Cursor::new(data);
        cursor.seek(0x12)?;
        let count = cursor.read_u16()? as usize;

        cursor.seek(0x38)?;
        let anchor = cursor.tell();
        let rel = cursor.read_i32()?;
        let offset_table = cursor.offset_of(anchor, rel.into())?;
        let anchor = cursor.tell();
        let rel = cursor.read_i32()?;
        let count_table = cursor.offset_of(anchor, rel.into())?;

        cursor.seek(offset_table)?;
        let mut offsets = Vec::new();
        for _ in 0..count {
            let _ = cursor.read_u32()?;
            offsets.push(cursor.read_u32()?);
        }
        cursor.seek(count_table)?;
        let mut sets = Vec::with_capacity(offsets.len());
        for definition_offset in offsets {
            let _ = cursor.read_u16()?;
            let frame_count = cursor.read_u16()?;
            sets.push(FrameSet {
                definition_offset,
                frame_count,
            });
        }
        Ok(Self { sets })
    }
}

/// Build a load request: the opcode, then the UTF-16 path in a fixed
/// 256-byte field. Forward slashes are converted for the service's host.
pub fn load_file_request(path: &Path) -> Result<Vec<u8>, AnimError> {
    let host_path = path.to_string_lossy().replace('/', "\\");
    let mut field: Vec<u8> = host_path
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    if field.len() > PATH_FIELD_LEN {
        return Err(AnimError::PathTooLong);
    }
    field.resize(PATH_FIELD_LEN, 0);
    let mut request = Vec::with_capacity(2 + PATH_FIELD_LEN);
    request.extend_from_slice(&OP_LOAD_FILE.to_le_bytes());
    request.extend(field);
    Ok(request)
}

/// Build the fixed 18-byte frame decode request.
pub fn decode_frame_request(
    definition_offset: u32,
    frame_count: u16,
    frame_index: u32,
    fraction: f32,
) -> [u8; 18] {
    let mut out = [0u8; 18];
    out[0..2].copy_from_slice(&OP_DECODE_FRAME.to_le_bytes());
    out[2..6].copy_from_slice(&definition_offset.to_le_bytes());
    out[6..10].copy_from_slice(&u32::from(frame_count).to_le_bytes());
    out[10..14].copy_from_slice(&frame_index.to_le_bytes());
    out[14..18].copy_from_slice(&fraction.to_le_bytes());
    out
}

fn parse_frame_fields(input: &mut &[u8]) -> WResult<BoneFrame> {
    let mut rotation = [0.0f32; 4];
    for v in &mut rotation {
        *v = le_f32.parse_next(input)?;
    }
    let mut position = [0.0f32; 3];
    for v in &mut position {
        *v = le_f32.parse_next(input)? / COORDINATE_SCALE;
    }
    let _pad = le_f32.parse_next(input)?;
    let mut scale = [0.0f32; 3];
    for v in &mut scale {
        *v = le_f32.parse_next(input)? / COORDINATE_SCALE;
    }
    let _pad = le_f32.parse_next(input)?;
    Ok(BoneFrame {
        rotation,
        position,
        scale,
    })
}

/// Decode the bone frames in a reply payload. Rotations are used as-is;
/// positions and scales are divided back down by the wire scale.
pub fn parse_bone_frames(payload: &[u8]) -> Result<Vec<BoneFrame>, AnimError> {
    if payload.len() % BONE_FRAME_LEN != 0 {
        return Err(AnimError::TruncatedPayload(payload.len()));
    }
    let mut frames = Vec::with_capacity(payload.len() / BONE_FRAME_LEN);
    for (idx, record) in payload.chunks_exact(BONE_FRAME_LEN).enumerate() {
        let mut input = record;
        let frame = parse_frame_fields(&mut input)
            .map_err(|e| record_error(idx * BONE_FRAME_LEN, "bone frame record", e))?;
        frames.push(frame);
    }
    Ok(frames)
}

/// Blocking client for the frame service.
#[derive(Debug)]
pub struct AnimClient {
    stream: TcpStream,
}

impl AnimClient {
    /// Connect to the service on its fixed local port.
    pub fn connect() -> Result<Self, AnimError> {
        Self::connect_to(SERVICE_ADDR)
    }

    /// Connect to a service listening somewhere else.
    pub fn connect_to(addr: impl ToSocketAddrs) -> Result<Self, AnimError> {
        Ok(Self {
            stream: TcpStream::connect(addr)?,
        })
    }

    /// Ask the service to load a clip file from its own filesystem.
    pub fn load_file(&mut self, path: &Path) -> Result<(), AnimError> {
        let request = load_file_request(path)?;
        self.stream.write_all(&request)?;
        let mut reply = [0u8; 4];
        self.stream.read_exact(&mut reply)?;
        let opcode = u16::from_le_bytes([reply[0], reply[1]]);
        if opcode != OP_LOAD_FILE_ACK {
            return Err(AnimError::UnexpectedOpcode {
                expected: OP_LOAD_FILE_ACK,
                got: opcode,
            });
        }
        let status = u16::from_le_bytes([reply[2], reply[3]]);
        if status != 0 {
            return Err(AnimError::Server(status));
        }
        Ok(())
    }

    /// Evaluate one frame of the loaded clip and return the bone poses.
    pub fn decode_frame(
        &mut self,
        set: &FrameSet,
        frame_index: u32,
        fraction: f32,
    ) -> Result<Vec<BoneFrame>, AnimError> {
        let request =
            decode_frame_request(set.definition_offset, set.frame_count, frame_index, fraction);
        self.stream.write_all(&request)?;
        let mut header = [0u8; 8];
        self.stream.read_exact(&mut header)?;
        let opcode = u16::from_le_bytes([header[0], header[1]]);
        if opcode != OP_DECODE_FRAME_ACK {
            return Err(AnimError::UnexpectedOpcode {
                expected: OP_DECODE_FRAME_ACK,
                got: opcode,
            });
        }
        let status = u16::from_le_bytes([header[2], header[3]]);
        if status != 0 {
            return Err(AnimError::Server(status));
        }
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if len % BONE_FRAME_LEN != 0 {
            return Err(AnimError::TruncatedPayload(len));
        }
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload)?;
        parse_bone_frames(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn f32s(vals: &[f32]) -> Vec<u8> {
        vals.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn frame_record(rotation: [f32; 4], position: [f32; 3], scale: [f32; 3]) -> Vec<u8> {
        let mut out = f32s(&rotation);
        out.extend(f32s(&position));
        out.extend(f32s(&[0.0]));
        out.extend(f32s(&scale));
        out.extend(f32s(&[0.0]));
        out
    }

    #[test]
    fn load_request_is_fixed_size_with_host_separators() {
        let request = load_file_request(Path::new("motion/chr001.mtb")).unwrap();
        assert_eq!(request.len(), 258);
        assert_eq!(request[0..2], OP_LOAD_FILE.to_le_bytes());
        let units: Vec<u16> = request[2..]
            .chunks_exact(2)
            .map(|raw| u16::from_le_bytes([raw[0], raw[1]]))
            .take_while(|&unit| unit != 0)
            .collect();
        assert_eq!(String::from_utf16(&units).unwrap(), "motion\\chr001.mtb");
        assert!(request[2 + 2 * 17..].iter().all(|&b| b == 0));
    }

    #[test]
    fn overlong_paths_are_rejected() {
        let path = "a".repeat(129);
        assert!(matches!(
            load_file_request(Path::new(&path)),
            Err(AnimError::PathTooLong)
        ));
        // 128 UTF-16 units exactly fill the field
        let path = "a".repeat(128);
        assert_eq!(load_file_request(Path::new(&path)).unwrap().len(), 258);
    }

    #[test]
    fn decode_request_layout_is_stable() {
        let request = decode_frame_request(0x1234, 30, 7, 0.5);
        let mut expected = Vec::new();
        expected.extend_from_slice(&0x3332u16.to_le_bytes());
        expected.extend_from_slice(&0x1234u32.to_le_bytes());
        expected.extend_from_slice(&30u32.to_le_bytes());
        expected.extend_from_slice(&7u32.to_le_bytes());
        expected.extend_from_slice(&0.5f32.to_le_bytes());
        assert_eq!(request.as_slice(), expected.as_slice());
    }

    #[test]
    fn payload_scaling_applies_to_position_and_scale_only() {
        let record = frame_record([0.0, 0.0, 0.0, 1.0], [10.0, 20.0, 30.0], [10.0, 10.0, 10.0]);
        let frames = parse_bone_frames(&record).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].rotation, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(frames[0].position, [1.0, 2.0, 3.0]);
        assert_eq!(frames[0].scale, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn ragged_payloads_are_rejected() {
        let err = parse_bone_frames(&[0u8; 47]).unwrap_err();
        assert!(matches!(err, AnimError::TruncatedPayload(47)));
    }

    #[test]
    fn directory_pairs_offsets_with_frame_counts() {
        let mut data = vec![0u8; 0x40];
        data[0x12..0x14].copy_from_slice(&2u16.to_le_bytes());
        let offset_table = data.len();
        data[0x38..0x3C].copy_from_slice(&((offset_table - 0x38) as i32).to_le_bytes());
        for (skip, offset) in [(0u32, 0x100u32), (0, 0x200)] {
            data.extend_from_slice(&skip.to_le_bytes());
            data.extend_from_slice(&offset.to_le_bytes());
        }
        let count_table = data.len();
        data[0x3C..0x40].copy_from_slice(&((count_table - 0x3C) as i32).to_le_bytes());
        for (skip, count) in [(0u16, 30u16), (0, 45)] {
            data.extend_from_slice(&skip.to_le_bytes());
            data.extend_from_slice(&count.to_le_bytes());
        }

        let directory = FrameSetDirectory::parse(&data).unwrap();
        assert_eq!(
            directory.sets,
            vec![
                FrameSet {
                    definition_offset: 0x100,
                    frame_count: 30,
                },
                FrameSet {
                    definition_offset: 0x200,
                    frame_count: 45,
                },
            ]
        );
    }

    #[test]
    fn client_round_trips_against_a_local_service() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let service = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();

            let mut load = [0u8; 258];
            conn.read_exact(&mut load).unwrap();
            assert_eq!(load[0..2], OP_LOAD_FILE.to_le_bytes());
            let mut ack = Vec::new();
            ack.extend_from_slice(&OP_LOAD_FILE_ACK.to_le_bytes());
            ack.extend_from_slice(&0u16.to_le_bytes());
            conn.write_all(&ack).unwrap();

            let mut decode = [0u8; 18];
            conn.read_exact(&mut decode).unwrap();
            assert_eq!(decode, decode_frame_request(0x80, 10, 3, 0.0));
            let payload = frame_record([0.0, 0.0, 0.0, 1.0], [10.0, 20.0, 30.0], [10.0; 3]);
            let mut reply = Vec::new();
            reply.extend_from_slice(&OP_DECODE_FRAME_ACK.to_le_bytes());
            reply.extend_from_slice(&0u16.to_le_bytes());
            reply.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            reply.extend(payload);
            conn.write_all(&reply).unwrap();
        });

        let mut client = AnimClient::connect_to(addr).unwrap();
        client.load_file(Path::new("motion/clip.mtb")).unwrap();
        let frames = client
            .decode_frame(
                &FrameSet {
                    definition_offset: 0x80,
                    frame_count: 10,
                },
                3,
                0.0,
            )
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].position, [1.0, 2.0, 3.0]);
        service.join().unwrap();
    }

    #[test]
    fn nonzero_status_surfaces_as_a_server_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let service = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut load = [0u8; 258];
            conn.read_exact(&mut load).unwrap();
            let mut ack = Vec::new();
            ack.extend_from_slice(&OP_LOAD_FILE_ACK.to_le_bytes());
            ack.extend_from_slice(&5u16.to_le_bytes());
            conn.write_all(&ack).unwrap();
        });

        let mut client = AnimClient::connect_to(addr).unwrap();
        let err = client.load_file(Path::new("missing.mtb")).unwrap_err();
        assert!(matches!(err, AnimError::Server(5)));
        service.join().unwrap();
    }
}
