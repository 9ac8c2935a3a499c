//!
//! Wire frame header, CRCs, and the codec that packs a logical command
//! into bytes and parses the reverse.
//!
//! This module performs no I/O and allocates no memory; it operates on
//! caller-provided buffers only, suitable for `no_std` use. It does not
//! locate frame boundaries in a byte stream — that is [`crate::deframer`]'s
//! job — it only encodes/decodes a single frame once its bounds are known.
//!
//! # Frame Layout
//!
//! ```text
//! +--------+--------+---------+-----------+---------+--------+---------+--------+
//! | MAGIC  |  LEN   | VERSION | SESSION/  | PAD/ENC | SEQ NUM| HEAD_CRC| PAYLOAD|
//! |        | (10bit)| (6 bit) | ACK (6bit)| (8 bit) |        |         | + CRC32|
//! +--------+--------+---------+-----------+---------+--------+---------+--------+
//! | 1 byte |    2 bytes (+ 2 more packed) | 4 bytes | 2 bytes| 2 bytes | N + 4  |
//! +--------+--------------------------------------------------------------------+
//! ```
//!
//! The 12-byte header is three little-endian 32-bit words: `[magic, length,
//! version, session_id, ack, reserved]`, `[pad_len, enc_type, reserved]`,
//! `[sequence_number, head_crc]`. The header CRC covers the first ten bytes;
//! the trailing CRC32 covers the header and the (possibly encrypted) payload.

use crc::{Crc, CRC_16_IBM_3740, CRC_32_ISO_HDLC};

use crate::cipher::Key;
use crate::private::*;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Compute the header CRC (CCITT-false 16-bit) over the first ten header bytes.
#[inline]
pub fn header_crc(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

/// Compute the whole-frame CRC (CRC-32/ISO-HDLC) over header + payload.
#[inline]
pub fn frame_crc(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}

/// Encryption type carried in the header's 3-bit `enc_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncType {
    /// Payload is sent in the clear.
    None,
    /// Payload is AES-128-ECB encrypted.
    Aes128Ecb,
}

impl EncType {
    fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Self::Aes128Ecb,
            _ => Self::None,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Aes128Ecb => 1,
        }
    }
}

///
/// The fixed 12-byte preamble of every on-wire frame.
///
/// Built by the codec on send and parsed on receive; immutable thereafter.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameHeader {
    /// Total frame length: header + payload + trailer, `12..=1024`.
    pub length: u16,
    /// Protocol version, 6 bits.
    pub version: u8,
    /// Session id, `0..=31`.
    pub session_id: u8,
    /// Set when this frame is an acknowledgement.
    pub ack: bool,
    /// Encryption applied to the payload.
    pub enc_type: EncType,
    /// Number of zero padding bytes appended to the plaintext before encryption.
    pub pad_len: u8,
    /// Sequence number, reused verbatim across retries of the same command.
    pub sequence: u16,
}

impl FrameHeader {
    /// Serialize the header into a 12-byte buffer, including its own CRC.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        let word0: u32 = (MAGIC as u32)
            | ((self.length as u32 & 0x3FF) << 8)
            | ((self.version as u32 & 0x3F) << 18)
            | ((self.session_id as u32 & 0x1F) << 24)
            | ((self.ack as u32) << 29);
        buf[0..4].copy_from_slice(&word0.to_le_bytes());

        let word1: u32 = (self.pad_len as u32 & 0x1F) | ((self.enc_type.to_bits() as u32 & 0x7) << 5);
        buf[4..8].copy_from_slice(&word1.to_le_bytes());

        buf[8..10].copy_from_slice(&self.sequence.to_le_bytes());

        let crc = header_crc(&buf[..10]);
        buf[10..12].copy_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Parse and validate a 12-byte header, including its CRC and basic sanity checks.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidHeaderCrc`], [`WireError::InvalidLength`], or
    /// [`WireError::UnsupportedVersion`] as appropriate.
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> StdResult<Self, WireError> {
        let crc = u16::from_le_bytes([bytes[10], bytes[11]]);
        if header_crc(&bytes[..10]) != crc {
            return Err(WireError::InvalidHeaderCrc);
        }

        let word0 = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let word1 = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let sequence = u16::from_le_bytes([bytes[8], bytes[9]]);

        let length = ((word0 >> 8) & 0x3FF) as u16;
        let version = ((word0 >> 18) & 0x3F) as u8;
        let session_id = ((word0 >> 24) & 0x1F) as u8;
        let ack = ((word0 >> 29) & 0x1) != 0;
        let pad_len = (word1 & 0x1F) as u8;
        let enc_type = EncType::from_bits(((word1 >> 5) & 0x7) as u8);

        if (length as usize) < HEADER_SIZE + TRAILER_SIZE || (length as usize) > MAX_FRAME_SIZE {
            return Err(WireError::InvalidLength {
                length: length as usize,
            });
        }
        if version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion { version });
        }

        Ok(Self {
            length,
            version,
            session_id,
            ack,
            enc_type,
            pad_len,
            sequence,
        })
    }
}

///
/// A validated, zero-copy view of a decoded frame.
///
/// The payload has already been decrypted (if applicable) and unpadded;
/// it borrows from the buffer that was handed to [`decode_frame`].
///
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawFrame<'t> {
    pub header: FrameHeader,
    payload: &'t [u8],
}

impl<'t> RawFrame<'t> {
    /// The decrypted, unpadded payload.
    #[inline]
    pub fn payload(&self) -> &'t [u8] {
        self.payload
    }

    /// Session id this frame belongs to.
    #[inline]
    pub fn session_id(&self) -> u8 {
        self.header.session_id
    }

    /// Sequence number of this frame.
    #[inline]
    pub fn sequence(&self) -> u16 {
        self.header.sequence
    }

    /// Whether this frame is an acknowledgement.
    #[inline]
    pub fn is_ack(&self) -> bool {
        self.header.ack
    }
}

/// Round `len` up to the next multiple of [`CIPHER_BLOCK_SIZE`], returning
/// the padded length and the number of padding bytes added.
fn padded_len(len: usize) -> (usize, u8) {
    let rem = len % CIPHER_BLOCK_SIZE;
    if rem == 0 {
        (len, 0)
    } else {
        let pad = CIPHER_BLOCK_SIZE - rem;
        (len + pad, pad as u8)
    }
}

/// Total on-wire size for a plaintext payload of `payload_len` bytes,
/// accounting for cipher-block padding when `encrypt` is set. Lets a caller
/// size an arena extent before calling [`encode_frame`].
pub fn encoded_len(payload_len: usize, encrypt: bool) -> usize {
    let payload_len = if encrypt { padded_len(payload_len).0 } else { payload_len };
    HEADER_SIZE + payload_len + TRAILER_SIZE
}

///
/// Encode a frame into `dst`.
///
/// `payload` is copied (and zero-padded/encrypted if `key` is `Some`) into
/// the destination buffer, framed with a header and trailing CRC32.
///
/// Returns the total number of bytes written.
///
/// # Errors
///
/// - [`Error::InvalidArgument`] if the payload exceeds [`MAX_PAYLOAD_SIZE`].
/// - [`Error::NoKey`] if `encrypt` is requested but `key` is `None`.
/// - [`Error::BufferTooSmall`] if `dst` cannot hold the encoded frame.
#[allow(clippy::too_many_arguments)]
pub fn encode_frame(
    dst: &mut [u8],
    session_id: u8,
    ack: bool,
    sequence: u16,
    payload: &[u8],
    encrypt: bool,
    key: Option<&Key>,
) -> Result<usize> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(Error::InvalidArgument);
    }
    if encrypt && key.is_none() {
        return Err(Error::NoKey);
    }

    let (payload_len, pad_len) = if encrypt {
        padded_len(payload.len())
    } else {
        (payload.len(), 0)
    };

    let total = HEADER_SIZE + payload_len + TRAILER_SIZE;
    if dst.len() < total {
        return Err(Error::BufferTooSmall { need: total });
    }

    dst[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
    for b in &mut dst[HEADER_SIZE + payload.len()..HEADER_SIZE + payload_len] {
        *b = 0;
    }

    if encrypt {
        // key.is_some() was checked above.
        key.unwrap()
            .encrypt_blocks(&mut dst[HEADER_SIZE..HEADER_SIZE + payload_len]);
    }

    let header = FrameHeader {
        length: total as u16,
        version: PROTOCOL_VERSION,
        session_id,
        ack,
        enc_type: if encrypt { EncType::Aes128Ecb } else { EncType::None },
        pad_len,
        sequence,
    };
    dst[..HEADER_SIZE].copy_from_slice(&header.encode());

    let crc = frame_crc(&dst[..HEADER_SIZE + payload_len]);
    dst[HEADER_SIZE + payload_len..total].copy_from_slice(&crc.to_le_bytes());

    #[cfg(feature = "log")]
    trace!(
        "Encoded frame: {{ session: {}, seq: {}, ack: {}, len: {} }}",
        session_id, sequence, ack, total
    );

    Ok(total)
}

///
/// Decode and validate a single frame occupying the entirety of `src`.
///
/// `src` must be exactly one candidate frame (the length the deframer
/// already determined from the header). Decrypts the payload in place if
/// the header indicates encryption.
///
/// # Errors
///
/// Returns [`WireError`] variants for header/frame CRC mismatches,
/// unsupported versions, invalid lengths, or a missing key for an
/// encrypted frame.
pub fn decode_frame<'t>(src: &'t mut [u8], key: Option<&Key>) -> StdResult<RawFrame<'t>, WireError> {
    if src.len() < HEADER_SIZE + TRAILER_SIZE {
        return Err(WireError::InvalidLength { length: src.len() });
    }

    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(&src[..HEADER_SIZE]);
    let header = FrameHeader::decode(&header_bytes)?;

    if header.length as usize != src.len() {
        return Err(WireError::InvalidLength {
            length: header.length as usize,
        });
    }

    let payload_end = src.len() - TRAILER_SIZE;
    let crc = read_u32_le(&src[payload_end..]);
    if frame_crc(&src[..payload_end]) != crc {
        return Err(WireError::InvalidFrameCrc);
    }

    let body = &mut src[HEADER_SIZE..payload_end];
    if header.enc_type == EncType::Aes128Ecb {
        let key = key.ok_or(WireError::NoKey)?;
        key.decrypt_blocks(body);
    }

    let plain_len = body.len().saturating_sub(header.pad_len as usize);
    let payload = &src[HEADER_SIZE..HEADER_SIZE + plain_len];

    #[cfg(feature = "log")]
    trace!(
        "Decoded frame: {{ session: {}, seq: {}, ack: {}, len: {} }}",
        header.session_id, header.sequence, header.ack, src.len()
    );

    Ok(RawFrame { header, payload })
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = FrameHeader {
            length: 42,
            version: PROTOCOL_VERSION,
            session_id: 7,
            ack: true,
            enc_type: EncType::Aes128Ecb,
            pad_len: 3,
            sequence: 0xBEEF,
        };
        let encoded = header.encode();
        let decoded = FrameHeader::decode(&encoded).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn header_crc_catches_corruption() {
        let header = FrameHeader {
            length: 20,
            version: PROTOCOL_VERSION,
            session_id: 1,
            ack: false,
            enc_type: EncType::None,
            pad_len: 0,
            sequence: 5,
        };
        let mut encoded = header.encode();
        encoded[0] ^= 0xFF;
        assert!(matches!(
            FrameHeader::decode(&encoded),
            Err(WireError::InvalidHeaderCrc)
        ));
    }

    #[test]
    fn encode_decode_round_trip_plaintext() {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let payload = b"hello onboard link";
        let size = encode_frame(&mut buf, 2, false, 10, payload, false, None).unwrap();
        let raw = decode_frame(&mut buf[..size], None).unwrap();
        assert_eq!(raw.payload(), payload);
        assert_eq!(raw.session_id(), 2);
        assert_eq!(raw.sequence(), 10);
        assert!(!raw.is_ack());
    }

    #[test]
    fn encode_decode_round_trip_encrypted() {
        let key = Key::new(&[0x42; 16]).unwrap();
        for len in [0usize, 1, 15, 16, 17, 255, MAX_PAYLOAD_SIZE] {
            let mut buf = [0u8; MAX_FRAME_SIZE];
            let payload: std::vec::Vec<u8> = (0..len).map(|i| i as u8).collect();
            let size = encode_frame(&mut buf, 3, true, 1, &payload, true, Some(&key)).unwrap();
            let raw = decode_frame(&mut buf[..size], Some(&key)).unwrap();
            assert_eq!(raw.payload(), payload.as_slice(), "len={len}");
        }
    }

    #[test]
    fn encrypted_send_without_key_fails_locally() {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let err = encode_frame(&mut buf, 3, true, 1, b"data", true, None).unwrap_err();
        assert_eq!(err, Error::NoKey);
    }

    #[test]
    fn oversized_payload_rejected() {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let payload = [0u8; MAX_PAYLOAD_SIZE + 1];
        let err = encode_frame(&mut buf, 2, false, 0, &payload, false, None).unwrap_err();
        assert_eq!(err, Error::InvalidArgument);
    }

    #[test]
    fn payload_crc_failure_detected() {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let size = encode_frame(&mut buf, 2, false, 0, b"abc", false, None).unwrap();
        buf[size - 1] ^= 0xFF;
        assert!(matches!(
            decode_frame(&mut buf[..size], None),
            Err(WireError::InvalidFrameCrc)
        ));
    }
}
