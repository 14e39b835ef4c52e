//! A minimal Modbus/TCP client, covering the two functions the robot controller uses.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, trace};

use crate::ModbusError;

pub const FN_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FN_WRITE_SINGLE_COIL: u8 = 0x05;

/// Size of the MBAP header preceding every PDU.
pub const MBAP_HEADER_LEN: usize = 7;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;
const EXCEPTION_FLAG: u8 = 0x80;

/// A flat bank of coils and discrete inputs.
///
/// This is the seam between the robot logic and the wire, implemented by
/// [`TcpCoilBus`] for the real controller and [`SimulatedRig`](crate::SimulatedRig)
/// for running without hardware.
pub trait CoilBus: Send {
    /// Opens the transport. Does nothing if it is already open.
    fn open(&mut self) -> Result<(), ModbusError>;
    fn close(&mut self);
    fn write_coil(&mut self, address: u16, value: bool) -> Result<(), ModbusError>;
    fn read_discrete_inputs(&mut self, address: u16, count: u16)
        -> Result<Vec<bool>, ModbusError>;
}

/// The protocol data unit of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pdu {
    WriteSingleCoil { address: u16, value: bool },
    ReadDiscreteInputs { address: u16, count: u16 },
}

/// A successfully decoded response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    CoilWritten { address: u16, value: bool },
    DiscreteInputs(Vec<bool>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction: u16,
    /// Number of bytes following the length field, i.e. unit id plus PDU.
    pub length: u16,
    pub unit: u8,
}

impl Pdu {
    pub fn function_code(&self) -> u8 {
        match self {
            Pdu::WriteSingleCoil { .. } => FN_WRITE_SINGLE_COIL,
            Pdu::ReadDiscreteInputs { .. } => FN_READ_DISCRETE_INPUTS,
        }
    }

    fn encode(&self) -> [u8; 5] {
        let (address, operand) = match *self {
            Pdu::WriteSingleCoil { address, value } => {
                (address, if value { COIL_ON } else { COIL_OFF })
            }
            Pdu::ReadDiscreteInputs { address, count } => (address, count),
        };
        let [a_hi, a_lo] = address.to_be_bytes();
        let [o_hi, o_lo] = operand.to_be_bytes();
        [self.function_code(), a_hi, a_lo, o_hi, o_lo]
    }
}

/// Encodes a complete request frame, header included.
pub fn encode_request(transaction: u16, unit: u8, pdu: &Pdu) -> Vec<u8> {
    let body = pdu.encode();
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + body.len());
    frame.extend_from_slice(&transaction.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes()); // protocol id
    frame.extend_from_slice(&(body.len() as u16 + 1).to_be_bytes());
    frame.push(unit);
    frame.extend_from_slice(&body);
    frame
}

pub fn decode_header(bytes: &[u8; MBAP_HEADER_LEN]) -> Result<MbapHeader, ModbusError> {
    let protocol = u16::from_be_bytes([bytes[2], bytes[3]]);
    if protocol != 0 {
        return Err(ModbusError::Malformed("protocol id is not Modbus"));
    }
    let length = u16::from_be_bytes([bytes[4], bytes[5]]);
    if length < 2 {
        return Err(ModbusError::Malformed("length too short for a PDU"));
    }
    Ok(MbapHeader {
        transaction: u16::from_be_bytes([bytes[0], bytes[1]]),
        length,
        unit: bytes[6],
    })
}

/// Decodes the PDU of a response to `request`.
pub fn decode_response(request: &Pdu, pdu: &[u8]) -> Result<Reply, ModbusError> {
    let (&function, data) = pdu
        .split_first()
        .ok_or(ModbusError::Malformed("empty PDU"))?;
    if function == request.function_code() | EXCEPTION_FLAG {
        let code = *data
            .first()
            .ok_or(ModbusError::Malformed("exception without code"))?;
        return Err(ModbusError::Exception {
            function: request.function_code(),
            code,
        });
    }
    if function != request.function_code() {
        return Err(ModbusError::Malformed("unexpected function code"));
    }

    match *request {
        Pdu::WriteSingleCoil { .. } => {
            if data.len() != 4 {
                return Err(ModbusError::Malformed("coil echo has wrong length"));
            }
            let address = u16::from_be_bytes([data[0], data[1]]);
            let value = match u16::from_be_bytes([data[2], data[3]]) {
                COIL_ON => true,
                COIL_OFF => false,
                _ => return Err(ModbusError::Malformed("invalid coil value")),
            };
            Ok(Reply::CoilWritten { address, value })
        }
        Pdu::ReadDiscreteInputs { count, .. } => {
            let (&byte_count, bits) = data
                .split_first()
                .ok_or(ModbusError::Malformed("missing byte count"))?;
            let needed = (count as usize).div_ceil(8);
            if byte_count as usize != bits.len() || bits.len() < needed {
                return Err(ModbusError::Malformed("byte count does not match"));
            }
            // Bits are packed LSB first.
            Ok(Reply::DiscreteInputs(
                (0..count as usize)
                    .map(|idx| bits[idx / 8] & (1 << (idx % 8)) != 0)
                    .collect(),
            ))
        }
    }
}

/// Sends one request over `stream` and waits for its response.
pub fn exchange<S: Read + Write>(
    stream: &mut S,
    transaction: u16,
    unit: u8,
    pdu: &Pdu,
) -> Result<Reply, ModbusError> {
    let frame = encode_request(transaction, unit, pdu);
    trace!(?pdu, transaction, "Sending Modbus request");
    stream.write_all(&frame)?;
    stream.flush()?;

    let mut header = [0u8; MBAP_HEADER_LEN];
    stream.read_exact(&mut header)?;
    let header = decode_header(&header)?;
    let mut body = vec![0u8; header.length as usize - 1];
    stream.read_exact(&mut body)?;
    if header.transaction != transaction {
        return Err(ModbusError::TransactionMismatch {
            expected: transaction,
            received: header.transaction,
        });
    }
    decode_response(pdu, &body)
}

/// The robot controller's Modbus/TCP server.
///
/// A dropped connection is reopened on the next request.
pub struct TcpCoilBus {
    host: String,
    port: u16,
    unit: u8,
    io_timeout: Duration,
    stream: Option<TcpStream>,
    transaction: u16,
}

impl TcpCoilBus {
    pub fn new(host: &str, port: u16, unit: u8, io_timeout: Duration) -> Self {
        Self {
            host: String::from(host),
            port,
            unit,
            io_timeout,
            stream: None,
            transaction: 0,
        }
    }

    fn connect(&self) -> Result<TcpStream, ModbusError> {
        let mut last_err = None;
        for addr in (self.host.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.io_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.io_timeout))?;
                    stream.set_write_timeout(Some(self.io_timeout))?;
                    stream.set_nodelay(true)?;
                    debug!(%addr, "Connected to robot controller");
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(ModbusError::Io(last_err.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", self.host),
            )
        })))
    }

    fn transact(&mut self, pdu: Pdu) -> Result<Reply, ModbusError> {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => {
                debug!("Reopening connection to robot controller");
                self.connect()?
            }
        };
        self.transaction = self.transaction.wrapping_add(1);
        let result = exchange(&mut stream, self.transaction, self.unit, &pdu);
        // After an I/O error the stream may be out of sync, so drop it.
        if !matches!(result, Err(ModbusError::Io(_))) {
            self.stream = Some(stream);
        }
        result
    }
}

impl CoilBus for TcpCoilBus {
    fn open(&mut self) -> Result<(), ModbusError> {
        if self.stream.is_none() {
            self.stream = Some(self.connect()?);
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn write_coil(&mut self, address: u16, value: bool) -> Result<(), ModbusError> {
        match self.transact(Pdu::WriteSingleCoil { address, value })? {
            Reply::CoilWritten {
                address: a,
                value: v,
            } if a == address && v == value => Ok(()),
            _ => Err(ModbusError::Malformed("coil echo does not match request")),
        }
    }

    fn read_discrete_inputs(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, ModbusError> {
        match self.transact(Pdu::ReadDiscreteInputs { address, count })? {
            Reply::DiscreteInputs(bits) => Ok(bits),
            Reply::CoilWritten { .. } => Err(ModbusError::Malformed("unexpected reply")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Records what was written and replays a canned response.
    struct FakeStream {
        written: Vec<u8>,
        response: Cursor<Vec<u8>>,
    }

    impl FakeStream {
        fn new(response: Vec<u8>) -> Self {
            Self {
                written: Vec::new(),
                response: Cursor::new(response),
            }
        }
    }

    impl Read for FakeStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.response.read(buf)
        }
    }

    impl Write for FakeStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn encode_write_single_coil() {
        let frame = encode_request(
            0x0102,
            1,
            &Pdu::WriteSingleCoil {
                address: 544,
                value: true,
            },
        );
        assert_eq!(
            frame,
            vec![0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x05, 0x02, 0x20, 0xFF, 0x00]
        );
    }

    #[test]
    fn encode_read_discrete_inputs() {
        let frame = encode_request(
            7,
            1,
            &Pdu::ReadDiscreteInputs {
                address: 511,
                count: 3,
            },
        );
        assert_eq!(
            frame,
            vec![0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01, 0x02, 0x01, 0xFF, 0x00, 0x03]
        );
    }

    #[test]
    fn decode_discrete_inputs_lsb_first() {
        let request = Pdu::ReadDiscreteInputs {
            address: 511,
            count: 3,
        };
        let reply = decode_response(&request, &[0x02, 0x01, 0b0000_0110]).unwrap();
        assert_eq!(reply, Reply::DiscreteInputs(vec![false, true, true]));
    }

    #[test]
    fn decode_exception() {
        let request = Pdu::WriteSingleCoil {
            address: 600,
            value: true,
        };
        match decode_response(&request, &[0x85, 0x02]) {
            Err(ModbusError::Exception { function, code }) => {
                assert_eq!(function, FN_WRITE_SINGLE_COIL);
                assert_eq!(code, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn decode_rejects_short_bit_payload() {
        let request = Pdu::ReadDiscreteInputs {
            address: 0,
            count: 9,
        };
        assert!(matches!(
            decode_response(&request, &[0x02, 0x01, 0xFF]),
            Err(ModbusError::Malformed(_))
        ));
    }

    #[test]
    fn header_must_be_modbus() {
        assert!(decode_header(&[0, 1, 0, 1, 0, 3, 1]).is_err());
        let header = decode_header(&[0, 9, 0, 0, 0, 3, 1]).unwrap();
        assert_eq!(
            header,
            MbapHeader {
                transaction: 9,
                length: 3,
                unit: 1
            }
        );
    }

    #[test]
    fn exchange_round_trip_over_stream() {
        let response = vec![0x00, 0x05, 0x00, 0x00, 0x00, 0x06, 0x01, 0x05, 0x02, 0x1B, 0x00, 0x00];
        let mut stream = FakeStream::new(response);
        let pdu = Pdu::WriteSingleCoil {
            address: 539,
            value: false,
        };
        let reply = exchange(&mut stream, 5, 1, &pdu).unwrap();
        assert_eq!(
            reply,
            Reply::CoilWritten {
                address: 539,
                value: false
            }
        );
        assert_eq!(stream.written, encode_request(5, 1, &pdu));
    }

    #[test]
    fn exchange_detects_stale_response() {
        let response = vec![0x00, 0x04, 0x00, 0x00, 0x00, 0x04, 0x01, 0x02, 0x01, 0x01];
        let mut stream = FakeStream::new(response);
        let pdu = Pdu::ReadDiscreteInputs {
            address: 511,
            count: 3,
        };
        assert!(matches!(
            exchange(&mut stream, 5, 1, &pdu),
            Err(ModbusError::TransactionMismatch {
                expected: 5,
                received: 4
            })
        ));
    }

    #[test]
    fn exchange_reports_truncated_response() {
        let mut stream = FakeStream::new(vec![0x00, 0x01, 0x00]);
        let pdu = Pdu::ReadDiscreteInputs {
            address: 511,
            count: 3,
        };
        assert!(matches!(
            exchange(&mut stream, 1, 1, &pdu),
            Err(ModbusError::Io(_))
        ));
    }
}
