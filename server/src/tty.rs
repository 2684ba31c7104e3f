//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! POSIX serial device
//!
//! The tty is opened non-blocking, put in raw mode and registered with the
//! tokio reactor through [`AsyncFd`]. Line settings and modem lines are
//! driven with termios and the `TIOCM*` ioctls.

use futures::task::noop_waker_ref;
use serbridge_service::{
    DeviceEndpoint, Endpoint, Parity, PortConfig, Rs485Config, SerialParams, SerialRequest,
};
use serbridge_telnetcodec::consts::modemstate;
use serbridge_telnetcodec::{control, purge};
use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::task::{Context, Poll};
use tokio::io::unix::AsyncFd;
use tracing::{debug, instrument, warn};

/// A serial port opened from a device path
#[derive(Debug)]
pub struct TtyDevice {
    fd: Option<AsyncFd<OwnedFd>>,
    path: String,
    params: SerialParams,
    flow: u8,
    break_on: bool,
}

impl TtyDevice {
    /// Open and configure the tty named by `config.device`. Must run inside a
    /// tokio runtime.
    #[instrument(skip(config), fields(device = %config.device))]
    pub fn open(config: &PortConfig) -> io::Result<Self> {
        let path = CString::new(config.device.as_str())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "device path contains NUL"))?;
        // SAFETY: `path` is a valid NUL terminated string for the duration
        // of the call.
        let raw = unsafe {
            libc::open(
                path.as_ptr(),
                libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK | libc::O_CLOEXEC,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `open` just returned this descriptor and nothing else owns it.
        let owned = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut termios = get_termios(owned.as_raw_fd())?;
        // SAFETY: `termios` was filled in by tcgetattr.
        unsafe { libc::cfmakeraw(&mut termios) };
        termios.c_cflag |= libc::CLOCAL | libc::CREAD;
        apply_params(&mut termios, &config.serial)?;
        set_termios(owned.as_raw_fd(), &termios)?;

        if let Some(rs485) = &config.rs485 {
            enable_rs485(owned.as_raw_fd(), rs485)?;
        }

        debug!(serial = %config.serial, "tty opened");
        Ok(Self {
            fd: Some(AsyncFd::new(owned)?),
            path: config.device.clone(),
            params: config.serial,
            flow: control::FLOW_NONE,
            break_on: false,
        })
    }

    fn async_fd(&self) -> io::Result<&AsyncFd<OwnedFd>> {
        self.fd
            .as_ref()
            .ok_or_else(|| io::ErrorKind::NotConnected.into())
    }

    fn raw(&self) -> io::Result<RawFd> {
        Ok(self.async_fd()?.as_raw_fd())
    }

    fn update_termios<F>(&self, change: F) -> io::Result<()>
    where
        F: FnOnce(&mut libc::termios) -> io::Result<()>,
    {
        let fd = self.raw()?;
        let mut termios = get_termios(fd)?;
        change(&mut termios)?;
        set_termios(fd, &termios)
    }

    fn modem_lines(&self) -> io::Result<libc::c_int> {
        let mut lines: libc::c_int = 0;
        // SAFETY: the descriptor is open and TIOCMGET writes one c_int.
        let ret = unsafe { libc::ioctl(self.raw()?, libc::TIOCMGET, &mut lines) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(lines)
    }

    fn set_modem_line(&self, line: libc::c_int, on: bool) -> io::Result<()> {
        let request = if on { libc::TIOCMBIS } else { libc::TIOCMBIC };
        // SAFETY: the descriptor is open and TIOCMBIS/TIOCMBIC read one c_int.
        let ret = unsafe { libc::ioctl(self.raw()?, request, &line) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_break(&mut self, on: bool) -> io::Result<()> {
        let request = if on { libc::TIOCSBRK } else { libc::TIOCCBRK };
        // SAFETY: the descriptor is open and the request takes no argument.
        let ret = unsafe { libc::ioctl(self.raw()?, request) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        self.break_on = on;
        Ok(())
    }

    fn set_flow(&mut self, flow: u8) -> io::Result<()> {
        self.update_termios(|t| {
            t.c_cflag &= !libc::CRTSCTS;
            t.c_iflag &= !(libc::IXON | libc::IXOFF | libc::IXANY);
            match flow {
                control::FLOW_XONXOFF => t.c_iflag |= libc::IXON | libc::IXOFF,
                control::FLOW_HARDWARE => t.c_cflag |= libc::CRTSCTS,
                _ => {}
            }
            Ok(())
        })?;
        self.flow = flow;
        Ok(())
    }

    fn control(&mut self, value: u8) -> io::Result<u8> {
        let on_off = |on: bool, yes: u8, no: u8| if on { yes } else { no };
        match value {
            control::FLOW_REQUEST => Ok(self.flow),
            control::FLOW_NONE | control::FLOW_XONXOFF | control::FLOW_HARDWARE => {
                self.set_flow(value)?;
                Ok(value)
            }
            control::BREAK_REQUEST => Ok(on_off(self.break_on, control::BREAK_ON, control::BREAK_OFF)),
            control::BREAK_ON | control::BREAK_OFF => {
                self.set_break(value == control::BREAK_ON)?;
                Ok(value)
            }
            control::DTR_REQUEST => {
                let on = self.modem_lines()? & libc::TIOCM_DTR != 0;
                Ok(on_off(on, control::DTR_ON, control::DTR_OFF))
            }
            control::DTR_ON | control::DTR_OFF => {
                self.set_modem_line(libc::TIOCM_DTR, value == control::DTR_ON)?;
                Ok(value)
            }
            control::RTS_REQUEST => {
                let on = self.modem_lines()? & libc::TIOCM_RTS != 0;
                Ok(on_off(on, control::RTS_ON, control::RTS_OFF))
            }
            control::RTS_ON | control::RTS_OFF => {
                self.set_modem_line(libc::TIOCM_RTS, value == control::RTS_ON)?;
                Ok(value)
            }
            other => {
                debug!(value = other, "unsupported control request");
                Ok(other)
            }
        }
    }
}

impl Endpoint for TtyDevice {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let fd = self.async_fd()?;
        let mut cx = Context::from_waker(noop_waker_ref());
        match fd.poll_read_ready(&mut cx) {
            Poll::Ready(Ok(mut guard)) => guard
                .try_io(|inner| read_fd(inner.as_raw_fd(), buf))
                .unwrap_or_else(|_would_block| Err(io::ErrorKind::WouldBlock.into())),
            Poll::Ready(Err(e)) => Err(e),
            Poll::Pending => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let fd = self.async_fd()?;
        let mut cx = Context::from_waker(noop_waker_ref());
        match fd.poll_write_ready(&mut cx) {
            Poll::Ready(Ok(mut guard)) => guard
                .try_io(|inner| write_fd(inner.as_raw_fd(), buf))
                .unwrap_or_else(|_would_block| Err(io::ErrorKind::WouldBlock.into())),
            Poll::Ready(Err(e)) => Err(e),
            Poll::Pending => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn poll_read_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &self.fd {
            Some(fd) => fd.poll_read_ready(cx).map_ok(|_guard| ()),
            None => Poll::Ready(Err(io::ErrorKind::NotConnected.into())),
        }
    }

    fn poll_write_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &self.fd {
            Some(fd) => fd.poll_write_ready(cx).map_ok(|_guard| ()),
            None => Poll::Ready(Err(io::ErrorKind::NotConnected.into())),
        }
    }

    fn close(&mut self) {
        if self.fd.take().is_some() {
            debug!(device = %self.path, "tty closed");
        }
    }

    fn send_queue_len(&self) -> Option<usize> {
        outq_len(self.raw().ok()?)
    }
}

impl DeviceEndpoint for TtyDevice {
    fn send_break(&mut self) -> io::Result<()> {
        // SAFETY: the descriptor is open; a zero duration is the default break.
        let ret = unsafe { libc::tcsendbreak(self.raw()?, 0) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn serial_control(&mut self, request: SerialRequest) -> io::Result<u32> {
        let mut params = self.params;
        match request {
            SerialRequest::Baud(0)
            | SerialRequest::DataSize(0)
            | SerialRequest::Parity(0)
            | SerialRequest::StopSize(0) => {}
            SerialRequest::Baud(baud) => {
                if speed_for(baud).is_some() {
                    params.baud = baud;
                } else {
                    warn!(device = %self.path, baud, "unsupported baud rate");
                }
            }
            SerialRequest::DataSize(bits @ 5..=8) => params.data_bits = bits,
            SerialRequest::DataSize(_) => {}
            SerialRequest::Parity(code) => {
                if let Some(parity) = Parity::from_rfc2217(code) {
                    params.parity = parity;
                }
            }
            SerialRequest::StopSize(code @ 1..=2) => params.stop_bits = code,
            SerialRequest::StopSize(3) => params.stop_bits = 2,
            SerialRequest::StopSize(_) => {}
            SerialRequest::Control(value) => return self.control(value).map(u32::from),
        }

        if params != self.params {
            self.update_termios(|t| apply_params(t, &params))?;
            self.params = params;
            debug!(device = %self.path, serial = %params, "line settings applied");
        }
        Ok(match request {
            SerialRequest::Baud(_) => self.params.baud,
            SerialRequest::DataSize(_) => u32::from(self.params.data_bits),
            SerialRequest::Parity(_) => u32::from(self.params.parity.to_rfc2217()),
            SerialRequest::StopSize(_) => u32::from(self.params.stop_bits),
            SerialRequest::Control(_) => 0,
        })
    }

    fn modem_state(&mut self) -> io::Result<Option<u8>> {
        let lines = self.modem_lines()?;
        Ok(Some(modem_bits(lines)))
    }

    fn purge(&mut self, which: u8) -> io::Result<()> {
        let queue = match which {
            purge::RECEIVE => libc::TCIFLUSH,
            purge::TRANSMIT => libc::TCOFLUSH,
            purge::BOTH => libc::TCIOFLUSH,
            _ => return Ok(()),
        };
        // SAFETY: the descriptor is open.
        let ret = unsafe { libc::tcflush(self.raw()?, queue) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Map `TIOCMGET` lines onto the RFC 2217 modem state byte
fn modem_bits(lines: libc::c_int) -> u8 {
    let mut state = 0;
    if lines & libc::TIOCM_CTS != 0 {
        state |= modemstate::CTS;
    }
    if lines & libc::TIOCM_DSR != 0 {
        state |= modemstate::DSR;
    }
    if lines & libc::TIOCM_RNG != 0 {
        state |= modemstate::RI;
    }
    if lines & libc::TIOCM_CAR != 0 {
        state |= modemstate::CD;
    }
    state
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

fn write_fd(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    // SAFETY: `buf` is valid for reads of `buf.len()` bytes.
    let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

fn get_termios(fd: RawFd) -> io::Result<libc::termios> {
    let mut termios = std::mem::MaybeUninit::<libc::termios>::uninit();
    // SAFETY: tcgetattr fills in the whole structure on success.
    let ret = unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `tcgetattr` returned successfully, therefore `termios` has been initialized.
    Ok(unsafe { termios.assume_init() })
}

fn set_termios(fd: RawFd, termios: &libc::termios) -> io::Result<()> {
    // SAFETY: `termios` is a valid, initialized structure.
    let ret = unsafe { libc::tcsetattr(fd, libc::TCSANOW, termios) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn apply_params(termios: &mut libc::termios, params: &SerialParams) -> io::Result<()> {
    let speed = speed_for(params.baud).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported baud rate {}", params.baud),
        )
    })?;
    // SAFETY: `termios` is a valid structure and `speed` a valid speed_t.
    let ret = unsafe { libc::cfsetspeed(termios, speed) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    termios.c_cflag &= !libc::CSIZE;
    termios.c_cflag |= match params.data_bits {
        5 => libc::CS5,
        6 => libc::CS6,
        7 => libc::CS7,
        _ => libc::CS8,
    };

    termios.c_cflag &= !(libc::PARENB | libc::PARODD);
    #[cfg(target_os = "linux")]
    {
        termios.c_cflag &= !libc::CMSPAR;
    }
    match params.parity {
        Parity::None => {}
        Parity::Odd => termios.c_cflag |= libc::PARENB | libc::PARODD,
        Parity::Even => termios.c_cflag |= libc::PARENB,
        #[cfg(target_os = "linux")]
        Parity::Mark => termios.c_cflag |= libc::PARENB | libc::PARODD | libc::CMSPAR,
        #[cfg(target_os = "linux")]
        Parity::Space => termios.c_cflag |= libc::PARENB | libc::CMSPAR,
        #[cfg(not(target_os = "linux"))]
        Parity::Mark | Parity::Space => {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "mark and space parity are not supported",
            ));
        }
    }

    if params.stop_bits >= 2 {
        termios.c_cflag |= libc::CSTOPB;
    } else {
        termios.c_cflag &= !libc::CSTOPB;
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn speed_for(baud: u32) -> Option<libc::speed_t> {
    Some(match baud {
        50 => libc::B50,
        75 => libc::B75,
        110 => libc::B110,
        134 => libc::B134,
        150 => libc::B150,
        200 => libc::B200,
        300 => libc::B300,
        600 => libc::B600,
        1200 => libc::B1200,
        1800 => libc::B1800,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        460_800 => libc::B460800,
        500_000 => libc::B500000,
        576_000 => libc::B576000,
        921_600 => libc::B921600,
        1_000_000 => libc::B1000000,
        1_152_000 => libc::B1152000,
        1_500_000 => libc::B1500000,
        2_000_000 => libc::B2000000,
        2_500_000 => libc::B2500000,
        3_000_000 => libc::B3000000,
        3_500_000 => libc::B3500000,
        4_000_000 => libc::B4000000,
        _ => return None,
    })
}

#[cfg(not(target_os = "linux"))]
fn speed_for(baud: u32) -> Option<libc::speed_t> {
    (baud > 0).then_some(baud as libc::speed_t)
}

#[cfg(target_os = "linux")]
fn outq_len(fd: RawFd) -> Option<usize> {
    let mut queued: libc::c_int = 0;
    // SAFETY: the descriptor is open and TIOCOUTQ writes one c_int.
    let ret = unsafe { libc::ioctl(fd, libc::TIOCOUTQ, &mut queued) };
    if ret < 0 {
        return None;
    }
    usize::try_from(queued).ok()
}

#[cfg(not(target_os = "linux"))]
fn outq_len(_fd: RawFd) -> Option<usize> {
    None
}

/// Kernel `struct serial_rs485`
#[cfg(target_os = "linux")]
#[repr(C)]
#[derive(Debug, Default)]
struct SerialRs485 {
    flags: u32,
    delay_rts_before_send: u32,
    delay_rts_after_send: u32,
    padding: [u32; 5],
}

#[cfg(target_os = "linux")]
fn enable_rs485(fd: RawFd, rs485: &Rs485Config) -> io::Result<()> {
    const SER_RS485_ENABLED: u32 = 1 << 0;
    const SER_RS485_RTS_ON_SEND: u32 = 1 << 1;
    const SER_RS485_RTS_AFTER_SEND: u32 = 1 << 2;
    const SER_RS485_RX_DURING_TX: u32 = 1 << 4;

    let mut conf = SerialRs485 {
        flags: SER_RS485_ENABLED,
        delay_rts_before_send: rs485.delay_rts_before_send,
        delay_rts_after_send: rs485.delay_rts_after_send,
        ..Default::default()
    };
    if rs485.rts_on_send {
        conf.flags |= SER_RS485_RTS_ON_SEND;
    }
    if rs485.rts_after_send {
        conf.flags |= SER_RS485_RTS_AFTER_SEND;
    }
    if rs485.rx_during_tx {
        conf.flags |= SER_RS485_RX_DURING_TX;
    }
    // SAFETY: the descriptor is open and TIOCSRS485 reads one serial_rs485.
    let ret = unsafe { libc::ioctl(fd, libc::TIOCSRS485, &conf) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    debug!(flags = conf.flags, "rs485 enabled");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn enable_rs485(_fd: RawFd, _rs485: &Rs485Config) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "rs485 is only supported on Linux",
    ))
}
