use byteorder::{ByteOrder, LittleEndian};

use super::constants::*;
use super::error::{BankError, TransportError};
use super::transport::{ByteReader, ByteWriter};

/// Location and type of one bank inside an event buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bank {
    pub name: String,
    pub tid: u32,
    pub data_size: u32,
    /// Offset of the bank payload from the start of the event buffer
    pub data_offset: usize,
}

// Bank record headers: name then type and size fields, padded in the aligned layout
const BANK_HEADER_16BIT: usize = 8;
const BANK_HEADER_32BIT: usize = 12;
const BANK_HEADER_32BIT_ALIGNED: usize = 16;

fn align8(size: usize) -> usize {
    (size + 7) & !7
}

/// MidasEvent is one event of the bank container format.
///
/// The raw event bytes (16 byte header followed by the bank payload) are kept as read.
/// Banks are discovered lazily: the first lookup walks the payload only as far as needed
/// and every bank found on the way is cached.
#[derive(Debug, Clone, Default)]
pub struct MidasEvent {
    pub event_id: u16,
    pub trigger_mask: u16,
    pub serial_number: u32,
    pub time_stamp: u32,
    /// Payload size declared by the header
    pub data_size: u32,
    /// Set when the event buffer is inconsistent. No banks are served from such an event.
    pub error: Option<String>,
    data: Vec<u8>,
    bank_header_flags: u32,
    banks: Vec<Bank>,
    found_all_banks: bool,
    bank_scan_position: usize,
}

impl MidasEvent {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&mut self, reason: String) {
        log::warn!("MidasEvent: {reason}");
        if self.error.is_none() {
            self.error = Some(reason);
        }
    }

    fn parse_header(&mut self, header: &[u8]) {
        self.event_id = LittleEndian::read_u16(&header[0..2]);
        self.trigger_mask = LittleEndian::read_u16(&header[2..4]);
        self.serial_number = LittleEndian::read_u32(&header[4..8]);
        self.time_stamp = LittleEndian::read_u32(&header[8..12]);
        self.data_size = LittleEndian::read_u32(&header[12..16]);
        self.bank_header_flags = 0;
    }

    /// Parse an event from a buffer holding exactly one event
    pub fn from_bytes(buf: &[u8]) -> Self {
        let mut event = Self::new();
        if buf.len() < MIDAS_EVENT_HEADER_SIZE {
            event.flag(format!(
                "Buffer size {} is smaller than event header size {MIDAS_EVENT_HEADER_SIZE}",
                buf.len()
            ));
            return event;
        }
        event.parse_header(buf);
        let event_size = event.data_size as usize + MIDAS_EVENT_HEADER_SIZE;
        if event_size != buf.len() {
            event.flag(format!(
                "Buffer size {} does not match event size {event_size}",
                buf.len()
            ));
            return event;
        }
        event.data = buf.to_vec();
        event
    }

    /// Read the next event from a transport.
    ///
    /// Returns None at a clean end of stream. A truncated header or payload gives an event
    /// with its error set.
    pub fn read_from<R: ByteReader + ?Sized>(reader: &mut R) -> Result<Option<Self>, TransportError> {
        let mut header = [0u8; MIDAS_EVENT_HEADER_SIZE];
        let read = reader.read(&mut header)?;
        if read == 0 {
            return Ok(None);
        }

        let mut event = Self::new();
        if read != MIDAS_EVENT_HEADER_SIZE {
            event.flag(format!(
                "Read {read} bytes, shorter than event header size {MIDAS_EVENT_HEADER_SIZE}"
            ));
            return Ok(Some(event));
        }
        event.parse_header(&header);

        let to_read = event.data_size as usize;
        if to_read > MIDAS_MAX_EVENT_SIZE {
            event.flag(format!("Event declares an implausible payload of {to_read} bytes"));
            return Ok(Some(event));
        }
        event.data = vec![0; MIDAS_EVENT_HEADER_SIZE + to_read];
        event.data[..MIDAS_EVENT_HEADER_SIZE].copy_from_slice(&header);
        let read = reader.read(&mut event.data[MIDAS_EVENT_HEADER_SIZE..])?;
        if read != to_read {
            event.data.truncate(MIDAS_EVENT_HEADER_SIZE + read);
            event.flag(format!("Short read {read} instead of {to_read}"));
        }
        Ok(Some(event))
    }

    /// Write the raw event bytes
    pub fn write_to<W: ByteWriter + ?Sized>(&self, writer: &mut W) -> Result<(), TransportError> {
        writer.write(&self.data)
    }

    /// Start building a new event with an empty bank list. A zero `time_stamp` means now.
    pub fn init(
        &mut self,
        event_id: u16,
        trigger_mask: u16,
        serial_number: u32,
        time_stamp: u32,
        capacity: usize,
    ) {
        *self = Self::new();
        self.event_id = event_id;
        self.trigger_mask = trigger_mask;
        self.serial_number = serial_number;
        self.time_stamp = if time_stamp != 0 {
            time_stamp
        } else {
            time::OffsetDateTime::now_utc().unix_timestamp() as u32
        };
        // Bank header only
        self.data_size = MIDAS_BANK_HEADER_SIZE as u32;
        self.bank_header_flags = MIDAS_DEFAULT_BANK_FLAGS;

        self.data
            .reserve(capacity.max(MIDAS_MIN_EVENT_CAPACITY));
        self.data
            .resize(MIDAS_EVENT_HEADER_SIZE + MIDAS_BANK_HEADER_SIZE, 0);
        LittleEndian::write_u16(&mut self.data[0..2], self.event_id);
        LittleEndian::write_u16(&mut self.data[2..4], self.trigger_mask);
        LittleEndian::write_u32(&mut self.data[4..8], self.serial_number);
        LittleEndian::write_u32(&mut self.data[8..12], self.time_stamp);
        LittleEndian::write_u32(&mut self.data[12..16], self.data_size);
        LittleEndian::write_u32(&mut self.data[16..20], 0);
        LittleEndian::write_u32(&mut self.data[20..24], self.bank_header_flags);
    }

    /// Append a bank in the 32-bit padded layout
    pub fn add_bank(&mut self, name: &str, tid: u32, payload: &[u8]) -> Result<(), BankError> {
        if self.data.is_empty() {
            return Err(BankError::NotInitialised);
        }
        if name.len() != MIDAS_BANK_NAME_LENGTH {
            return Err(BankError::BadName(name.to_string()));
        }
        if !(MIDAS_TID_FIRST..MIDAS_TID_LAST).contains(&tid) {
            return Err(BankError::BadType(tid));
        }
        let payload_size =
            u32::try_from(payload.len()).map_err(|_| BankError::TooLarge(payload.len()))?;

        let bank_start = self.data.len();
        let bank_size = BANK_HEADER_32BIT_ALIGNED + align8(payload.len());
        self.data.resize(bank_start + bank_size, 0);
        let bank = &mut self.data[bank_start..];
        bank[0..4].copy_from_slice(name.as_bytes());
        LittleEndian::write_u32(&mut bank[4..8], tid);
        LittleEndian::write_u32(&mut bank[8..12], payload_size);
        LittleEndian::write_u32(&mut bank[12..16], 0);
        bank[16..16 + payload.len()].copy_from_slice(payload);

        self.data_size += bank_size as u32;
        LittleEndian::write_u32(&mut self.data[12..16], self.data_size);
        LittleEndian::write_u32(
            &mut self.data[16..20],
            self.data_size - MIDAS_BANK_HEADER_SIZE as u32,
        );

        if self.found_all_banks {
            self.banks.push(Bank {
                name: name.to_string(),
                tid,
                data_size: payload_size,
                data_offset: bank_start + BANK_HEADER_32BIT_ALIGNED,
            });
        }
        Ok(())
    }

    /// Validate the bank header. Returns the position of the first bank, or 0 on error.
    fn find_first_bank(&mut self) -> usize {
        if self.error.is_some() {
            return 0;
        }
        let offset = MIDAS_EVENT_HEADER_SIZE;
        if self.data.len() < offset + MIDAS_BANK_HEADER_SIZE {
            self.flag(format!("Data size {} is too small", self.data.len()));
            return 0;
        }
        let bank_header_data_size = LittleEndian::read_u32(&self.data[offset..offset + 4]);
        let flags = LittleEndian::read_u32(&self.data[offset + 4..offset + 8]);
        if bank_header_data_size as u64 + MIDAS_BANK_HEADER_SIZE as u64 != self.data_size as u64 {
            self.flag(format!(
                "Bank header size {bank_header_data_size} mismatch against data size {}",
                self.data_size
            ));
            return 0;
        }
        self.bank_header_flags = flags;
        offset + MIDAS_BANK_HEADER_SIZE
    }

    /// Read the bank at `position`. Returns the position of the following bank, or 0
    /// when there are no more banks or the bank is malformed.
    fn find_next_bank(&mut self, position: usize) -> (usize, Option<Bank>) {
        if self.error.is_some() {
            return (0, None);
        }
        let remaining = self.data.len() - position;
        if remaining == 0 {
            self.found_all_banks = true;
            return (0, None);
        }
        if remaining < MIDAS_BANK_HEADER_SIZE {
            self.flag(format!(
                "Too few bytes {remaining} remaining at the end of event"
            ));
            self.found_all_banks = true;
            return (0, None);
        }

        let header_size = if self.bank_header_flags & MIDAS_BANK_FLAG_32BIT_ALIGNED != 0 {
            BANK_HEADER_32BIT_ALIGNED
        } else if self.bank_header_flags & MIDAS_BANK_FLAG_32BIT != 0 {
            BANK_HEADER_32BIT
        } else {
            BANK_HEADER_16BIT
        };
        if remaining < header_size {
            self.flag(format!(
                "Too few bytes {remaining} remaining for a bank header of {header_size}"
            ));
            self.found_all_banks = true;
            return (0, None);
        }

        let name = String::from_utf8_lossy(&self.data[position..position + 4]).into_owned();
        let fields = &self.data[position + 4..position + header_size];
        let (tid, data_size) = if header_size == BANK_HEADER_16BIT {
            (
                LittleEndian::read_u16(&fields[0..2]) as u32,
                LittleEndian::read_u16(&fields[2..4]) as u32,
            )
        } else {
            (
                LittleEndian::read_u32(&fields[0..4]),
                LittleEndian::read_u32(&fields[4..8]),
            )
        };
        let data_offset = position + header_size;

        if !(MIDAS_TID_FIRST..MIDAS_TID_LAST).contains(&tid) {
            self.flag(format!("Invalid tid {tid} in bank {name}"));
            return (0, None);
        }

        let next = data_offset + align8(data_size as usize);
        if next > self.data.len() {
            self.flag(format!(
                "Invalid bank data size {data_size} in bank {name}: next bank at {next}, end of event {}",
                self.data.len()
            ));
            return (0, None);
        }

        let bank = Bank {
            name,
            tid,
            data_size,
            data_offset,
        };
        self.banks.push(bank.clone());
        (next, Some(bank))
    }

    fn scan_banks(&mut self, name: Option<&str>) -> Option<Bank> {
        if self.error.is_some() {
            return None;
        }
        if let Some(name) = name {
            if let Some(bank) = self.banks.iter().find(|bank| bank.name == name) {
                return Some(bank.clone());
            }
        }
        if self.found_all_banks {
            return None;
        }

        let mut position = self.bank_scan_position;
        if position == 0 {
            position = self.find_first_bank();
        }
        while position > 0 {
            let (next, bank) = self.find_next_bank(position);
            position = next;
            self.bank_scan_position = position;
            if let (Some(bank), Some(name)) = (bank, name) {
                if position > 0 && bank.name == name {
                    return Some(bank);
                }
            }
        }

        self.found_all_banks = true;
        None
    }

    /// Look up a bank by name
    pub fn find_bank(&mut self, name: &str) -> Option<Bank> {
        self.scan_banks(Some(name))
    }

    /// Discover every bank of the event, in payload order
    pub fn find_all_banks(&mut self) -> &[Bank] {
        if !self.found_all_banks {
            self.scan_banks(None);
        }
        &self.banks
    }

    /// Banks discovered so far
    pub fn banks(&self) -> &[Bank] {
        &self.banks
    }

    pub fn bank_scan_position(&self) -> usize {
        self.bank_scan_position
    }

    /// Payload of a bank, None if the event is in error or the bank lies out of bounds
    pub fn bank_data(&self, bank: &Bank) -> Option<&[u8]> {
        if self.error.is_some() {
            return None;
        }
        let end = bank.data_offset + bank.data_size as usize;
        if bank.data_offset >= self.data.len() || end > self.data.len() {
            return None;
        }
        Some(&self.data[bank.data_offset..end])
    }

    /// Bank payload decoded as little-endian 16-bit words
    pub fn bank_u16(&mut self, name: &str) -> Option<Vec<u16>> {
        let bank = self.find_bank(name)?;
        let data = self.bank_data(&bank)?;
        Some(data.chunks_exact(2).map(LittleEndian::read_u16).collect())
    }

    /// Bank payload decoded as little-endian 32-bit words
    pub fn bank_u32(&mut self, name: &str) -> Option<Vec<u32>> {
        let bank = self.find_bank(name)?;
        let data = self.bank_data(&bank)?;
        Some(data.chunks_exact(4).map(LittleEndian::read_u32).collect())
    }

    /// Bank payload as bytes
    pub fn bank_u8(&mut self, name: &str) -> Option<Vec<u8>> {
        let bank = self.find_bank(name)?;
        self.bank_data(&bank).map(|data| data.to_vec())
    }

    /// Raw event bytes, header included
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The payload following the header, None if the event is inconsistent
    pub fn event_data(&self) -> Option<&[u8]> {
        if self.error.is_some() || self.data.is_empty() {
            return None;
        }
        self.data
            .get(MIDAS_EVENT_HEADER_SIZE..MIDAS_EVENT_HEADER_SIZE + self.data_size as usize)
    }

    /// True for begin-of-run, end-of-run and message records
    pub fn is_system_event(&self) -> bool {
        matches!(
            self.event_id,
            MIDAS_BOR_EVENT_ID | MIDAS_EOR_EVENT_ID | MIDAS_MESSAGE_EVENT_ID
        )
    }

    pub fn header_string(&self) -> String {
        format!(
            "event: id {}, mask 0x{:04x}, serial {}, time {}, size {}, error {}, banks {}",
            self.event_id,
            self.trigger_mask,
            self.serial_number,
            self.time_stamp,
            self.data_size,
            self.error.is_some() as i32,
            self.banks.len()
        )
    }

    pub fn bank_list_string(&self) -> String {
        self.banks
            .iter()
            .map(|bank| bank.name.as_str())
            .collect::<Vec<&str>>()
            .join(",")
    }

    pub fn bank_string(&self, bank: &Bank) -> String {
        format!(
            "name \"{}\", type {}, size {}, offset {}",
            bank.name, bank.tid, bank.data_size, bank.data_offset
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamReader;
    use std::io::Cursor;

    fn sample_event() -> MidasEvent {
        let mut event = MidasEvent::new();
        event.init(1, 0x0002, 7, 1_700_000_000, 0);
        event
            .add_bank("COUN", MIDAS_TID_UINT32, &42u32.to_le_bytes())
            .unwrap();
        event
            .add_bank("WAVE", MIDAS_TID_UINT16, &[1, 0, 2, 0, 3, 0])
            .unwrap();
        event.add_bank("NADC", MIDAS_TID_UINT8, &[3]).unwrap();
        event
    }

    #[test]
    fn test_bank_round_trip() {
        let built = sample_event();
        let mut event = MidasEvent::from_bytes(built.data());
        assert!(event.error.is_none());
        assert_eq!(event.serial_number, 7);

        let names: Vec<String> = event
            .find_all_banks()
            .iter()
            .map(|bank| bank.name.clone())
            .collect();
        assert_eq!(names, vec!["COUN", "WAVE", "NADC"]);
        assert_eq!(event.bank_list_string(), "COUN,WAVE,NADC");

        let wave = event.find_bank("WAVE").unwrap();
        assert_eq!(event.bank_data(&wave).unwrap(), &[1, 0, 2, 0, 3, 0]);
        assert_eq!(event.bank_u16("WAVE").unwrap(), vec![1, 2, 3]);
        assert_eq!(event.bank_u32("COUN").unwrap(), vec![42]);
        assert_eq!(event.bank_u8("NADC").unwrap(), vec![3]);
        assert!(event.find_bank("NONE").is_none());
    }

    #[test]
    fn test_find_bank_idempotent() {
        let built = sample_event();
        let mut event = MidasEvent::from_bytes(built.data());
        let first = event.find_bank("COUN").unwrap();
        let position = event.bank_scan_position();
        assert_ne!(position, 0);
        let again = event.find_bank("COUN").unwrap();
        assert_eq!(first, again);
        assert_eq!(event.bank_scan_position(), position);
        assert_eq!(event.banks().len(), 1);
    }

    #[test]
    fn test_header_sizes() {
        let event = sample_event();
        // 8 byte bank header, then 16 byte bank headers with padded payloads
        assert_eq!(event.data_size, 8 + (16 + 8) + (16 + 8) + (16 + 8));
        assert_eq!(event.data().len(), 16 + event.data_size as usize);
        assert_eq!(
            LittleEndian::read_u32(&event.data()[16..20]),
            event.data_size - 8
        );
        assert_eq!(
            event.header_string(),
            "event: id 1, mask 0x0002, serial 7, time 1700000000, size 80, error 0, banks 0"
        );
    }

    #[test]
    fn test_add_bank_preconditions() {
        let mut event = MidasEvent::new();
        assert_eq!(
            event.add_bank("COUN", MIDAS_TID_UINT32, &[0; 4]),
            Err(BankError::NotInitialised)
        );
        event.init(1, 0, 0, 0, 0);
        assert_ne!(event.time_stamp, 0);
        assert_eq!(
            event.add_bank("COUNT", MIDAS_TID_UINT32, &[0; 4]),
            Err(BankError::BadName(String::from("COUNT")))
        );
        assert_eq!(
            event.add_bank("COUN", 19, &[0; 4]),
            Err(BankError::BadType(19))
        );
    }

    #[test]
    fn test_add_after_discovery() {
        let mut event = sample_event();
        assert_eq!(event.find_all_banks().len(), 3);
        event.add_bank("TBIN", MIDAS_TID_UINT16, &[9, 0]).unwrap();
        assert_eq!(event.banks().len(), 4);
        assert_eq!(event.bank_u16("TBIN").unwrap(), vec![9]);
    }

    #[test]
    fn test_16bit_layout() {
        // bank header flags 0x01: 16-bit type and size fields
        let mut data = Vec::new();
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&24u32.to_le_bytes());
        data.extend_from_slice(&16u32.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(b"NWAV");
        data.extend_from_slice(&(MIDAS_TID_UINT16 as u16).to_le_bytes());
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&[5, 0, 0, 0, 0, 0, 0, 0]);
        let mut event = MidasEvent::from_bytes(&data);
        assert!(event.error.is_none());
        assert_eq!(event.bank_u16("NWAV").unwrap(), vec![5]);
    }

    #[test]
    fn test_32bit_layout() {
        // bank header flags 0x11: 32-bit type and size fields, 12 byte bank headers
        let banks: [(&[u8; 4], u32, &[u8]); 3] = [
            (b"COUN", MIDAS_TID_UINT32, &[42, 0, 0, 0]),
            (b"WAVE", MIDAS_TID_UINT16, &[1, 0, 2, 0, 3, 0]),
            (b"NADC", MIDAS_TID_UINT8, &[9, 8, 7, 6, 5, 4, 3, 2, 1]),
        ];
        let mut payload = Vec::new();
        for (name, tid, bytes) in banks {
            payload.extend_from_slice(name);
            payload.extend_from_slice(&tid.to_le_bytes());
            payload.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            payload.extend_from_slice(bytes);
            payload.resize(align8(payload.len()), 0);
        }
        let mut data = Vec::new();
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&(payload.len() as u32 + 8).to_le_bytes());
        data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        data.extend_from_slice(&(MIDAS_BANK_FLAG_32BIT | 1).to_le_bytes());
        data.extend_from_slice(&payload);

        let mut event = MidasEvent::from_bytes(&data);
        assert!(event.error.is_none());
        let found = event.find_all_banks().to_vec();
        assert!(event.error.is_none());
        let names: Vec<&str> = found.iter().map(|bank| bank.name.as_str()).collect();
        assert_eq!(names, vec!["COUN", "WAVE", "NADC"]);
        let sizes: Vec<u32> = found.iter().map(|bank| bank.data_size).collect();
        assert_eq!(sizes, vec![4, 6, 9]);
        let offsets: Vec<usize> = found.iter().map(|bank| bank.data_offset).collect();
        assert_eq!(offsets, vec![36, 56, 76]);
        // Payloads are padded to 8 bytes, so each header sits 8-aligned after the first
        for pair in found.windows(2) {
            let padded = pair[1].data_offset - BANK_HEADER_32BIT - pair[0].data_offset;
            assert_eq!(padded, align8(pair[0].data_size as usize));
            assert_eq!(padded % 8, 0);
        }
        assert_eq!(
            found[2].data_offset + align8(found[2].data_size as usize),
            data.len()
        );

        assert_eq!(event.bank_u32("COUN").unwrap(), vec![42]);
        assert_eq!(event.bank_u16("WAVE").unwrap(), vec![1, 2, 3]);
        assert_eq!(
            event.bank_data(&found[2]).unwrap(),
            &[9, 8, 7, 6, 5, 4, 3, 2, 1]
        );
    }

    #[test]
    fn test_bank_overrun_flagged() {
        let mut built = sample_event();
        let mut data = built.data().to_vec();
        // Inflate the size of the last bank past the end of the event
        let last = built.find_all_banks()[2].data_offset;
        LittleEndian::write_u32(&mut data[last - 8..last - 4], 64);
        let mut event = MidasEvent::from_bytes(&data);
        assert!(event.find_bank("NADC").is_none());
        assert!(event.error.is_some());
    }

    #[test]
    fn test_read_from_stream() {
        let first = sample_event();
        let mut second = MidasEvent::new();
        second.init(2, 0, 8, 1, 0);
        let mut bytes = first.data().to_vec();
        bytes.extend_from_slice(second.data());
        bytes.extend_from_slice(&first.data()[..20]);

        let mut reader = StreamReader::new(Cursor::new(bytes));
        let event = MidasEvent::read_from(&mut reader).unwrap().unwrap();
        assert!(event.error.is_none());
        assert_eq!(event.data(), first.data());
        let event = MidasEvent::read_from(&mut reader).unwrap().unwrap();
        assert_eq!(event.event_id, 2);
        let truncated = MidasEvent::read_from(&mut reader).unwrap().unwrap();
        assert!(truncated.error.is_some());
        assert!(MidasEvent::read_from(&mut reader).unwrap().is_none());
    }
}
