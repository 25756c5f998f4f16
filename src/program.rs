// In-memory representation of a program, based on the serial upload protocol:
// a 6-byte magic header, a 16-bit instruction count, the 12-bit program words
// in 16-bit little-endian carriers and a 16-bit additive checksum.

use thiserror::Error;
use tracing::warn;

/// Type of a program word. This is 12 bits on the actual hardware.
pub type ProgramWord = u16;

/// Address of a word in program memory as offset in words from the beginning.
pub type ProgramAddr = u16;

pub const PROGRAM_MEMORY_SIZE: usize = 4096;

pub const HEADER_MAGIC: [u8; 6] = [0x00, 0xff, 0x00, 0xff, 0xa5, 0xc3];

/// Magic + length word + checksum word.
const MIN_FILE_SIZE: usize = HEADER_MAGIC.len() + 4;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("program file too small: {actual} bytes, need at least {expected}")]
    TooSmall { expected: usize, actual: usize },
    #[error("invalid magic: {0:02x?}")]
    InvalidMagic(Vec<u8>),
    #[error("program length {0} outside 1..={}", PROGRAM_MEMORY_SIZE)]
    InvalidLength(u16),
    #[error("file size inconsistent with program length: {actual} != {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("bad checksum: computed {computed:#06x}, expected {expected:#06x}")]
    BadChecksum { computed: u16, expected: u16 },
}

/// How to treat a checksum mismatch during load.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ChecksumPolicy {
    /// Log a warning and load the program anyway.
    Permissive,
    /// Reject the program.
    Strict,
}

/// A validated program image. Immutable after load. Program memory always
/// spans the full 4096 words because the program counter wraps over unset
/// memory, which reads as zero.
pub struct Program {
    pub length: u16,
    pub checksum: u16,
    instructions: Vec<ProgramWord>,
}

impl Program {
    pub fn load(buffer: &[u8], policy: ChecksumPolicy) -> Result<Program, LoadError> {
        if buffer.len() < MIN_FILE_SIZE {
            return Err(LoadError::TooSmall { expected: MIN_FILE_SIZE, actual: buffer.len() });
        }
        if buffer[..HEADER_MAGIC.len()] != HEADER_MAGIC {
            return Err(LoadError::InvalidMagic(buffer[..HEADER_MAGIC.len()].to_vec()));
        }
        let mut ptr = &buffer[HEADER_MAGIC.len()..];
        let length = read_protocol_word(&mut ptr);
        if length == 0 || length as usize > PROGRAM_MEMORY_SIZE {
            return Err(LoadError::InvalidLength(length));
        }
        let expected_size = MIN_FILE_SIZE + length as usize * 2;
        if buffer.len() != expected_size {
            return Err(LoadError::SizeMismatch { expected: expected_size, actual: buffer.len() });
        }

        let mut instructions = vec![0; PROGRAM_MEMORY_SIZE];
        let mut computed_checksum = length;
        for slot in instructions.iter_mut().take(length as usize) {
            let word = read_protocol_word(&mut ptr);
            computed_checksum = computed_checksum.wrapping_add(word);
            *slot = word;
        }

        let checksum = read_protocol_word(&mut ptr);
        if computed_checksum != checksum {
            match policy {
                ChecksumPolicy::Strict => {
                    return Err(LoadError::BadChecksum { computed: computed_checksum, expected: checksum });
                }
                ChecksumPolicy::Permissive => {
                    warn!(computed = computed_checksum, expected = checksum, "bad checksum, loading anyway");
                }
            }
        }

        Ok(Program { length, checksum, instructions })
    }

    /// Builds a program image directly from words, without the file framing.
    pub fn from_words(words: &[ProgramWord]) -> Program {
        let mut instructions = vec![0; PROGRAM_MEMORY_SIZE];
        for (slot, &word) in instructions.iter_mut().zip(words) {
            *slot = word & 0xfff;
        }
        Program { length: words.len() as u16, checksum: 0, instructions }
    }

    /// Reads the program word at the given address. Unset positions beyond
    /// the loaded program read as zero.
    pub fn fetch(&self, addr: ProgramAddr) -> ProgramWord {
        self.instructions[addr as usize]
    }
}

fn read_protocol_word(buffer: &mut &[u8]) -> u16 {
    let word = u16::from(buffer[0]) | (u16::from(buffer[1]) << 8);
    *buffer = &buffer[2..];
    word
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serialize(words: &[u16], checksum_delta: u16) -> Vec<u8> {
        let mut data = HEADER_MAGIC.to_vec();
        data.extend_from_slice(&(words.len() as u16).to_le_bytes());
        let mut checksum = words.len() as u16;
        for &word in words {
            data.extend_from_slice(&word.to_le_bytes());
            checksum = checksum.wrapping_add(word);
        }
        data.extend_from_slice(&checksum.wrapping_add(checksum_delta).to_le_bytes());
        data
    }

    #[test]
    fn loads_a_valid_file() {
        let data = serialize(&[0x100, 0x200], 0);
        assert_eq!(data[6..8], [2, 0]);
        assert_eq!(*data.last().unwrap(), 0x03);
        let prg = Program::load(&data, ChecksumPolicy::Strict).unwrap();
        assert_eq!(prg.length, 2);
        assert_eq!(prg.checksum, 0x0302);
        assert_eq!(prg.fetch(0), 0x100);
        assert_eq!(prg.fetch(1), 0x200);
        assert_eq!(prg.fetch(2), 0);
        assert_eq!(prg.fetch(4095), 0);
    }

    #[test]
    fn rejects_a_short_buffer() {
        match Program::load(&[0x00, 0xff], ChecksumPolicy::Strict) {
            Err(LoadError::TooSmall { actual: 2, .. }) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = serialize(&[0x100], 0);
        data[4] = 0x5a;
        assert!(matches!(Program::load(&data, ChecksumPolicy::Strict), Err(LoadError::InvalidMagic(_))));
    }

    #[test]
    fn rejects_inconsistent_size() {
        let mut data = serialize(&[0x100, 0x200], 0);
        data.push(0);
        assert!(matches!(
            Program::load(&data, ChecksumPolicy::Strict),
            Err(LoadError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_zero_length() {
        let data = serialize(&[], 0);
        assert!(matches!(Program::load(&data, ChecksumPolicy::Strict), Err(LoadError::InvalidLength(0))));
    }

    #[test]
    fn checksum_policy_decides_on_mismatch() {
        let data = serialize(&[0x123], 1);
        assert!(matches!(
            Program::load(&data, ChecksumPolicy::Strict),
            Err(LoadError::BadChecksum { .. })
        ));
        let prg = Program::load(&data, ChecksumPolicy::Permissive).unwrap();
        assert_eq!(prg.fetch(0), 0x123);
    }
}
