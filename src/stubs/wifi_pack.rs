//! WiFi/lwip entry points. Station/AP lifecycle calls
//! (`esp_wifi_init`/`esp_wifi_start`/`esp_wifi_connect`) report canned
//! success without touching any host network interface — `SPEC_FULL.md`
//! §4.4 only requires that firmware *believe* it's connected, not that a
//! real radio exists. The BSD socket calls underneath lwip's `sockets.h`
//! (`socket`/`connect`/`send`/`recv`/`close`) forward to real host TCP/UDP
//! sockets, grounded in `examples/original_source/src/emu_wifi.c`'s
//! host-socket passthrough.
//!
//! Only a small, commonly-used subset of the BSD socket API is modeled:
//! blocking TCP client sockets and connectionless UDP sockets. Listening
//! sockets, `select`/`poll`, and non-blocking mode are out of scope — no
//! firmware in this pack's corpus runs as a server.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpStream, UdpSocket};
use std::sync::{Arc, Mutex};

use crate::hooks::HookTable;
use crate::memory::AddressSpace;
use crate::registers::RegisterFile;
use crate::symbols::SymbolTable;

use super::{install, StubContext};

const ESP_OK: u32 = 0;
const ESP_FAIL: u32 = 0xFFFF_FFFF;

const AF_INET: u32 = 2;
const SOCK_STREAM: u32 = 1;
const SOCK_DGRAM: u32 = 2;

/// A live host socket backing a guest `int` file descriptor. `TcpPending`
/// covers the gap between `socket(AF_INET, SOCK_STREAM, 0)`, which has
/// nothing to connect yet, and `connect`, which supplies the peer address.
pub enum Socket {
    TcpPending,
    Tcp(TcpStream),
    Udp(UdpSocket),
}

fn sockaddr_in_to_std(mem: &mut AddressSpace, addr_ptr: u32) -> SocketAddrV4 {
    // `struct sockaddr_in { sa_family_t sin_family; in_port_t sin_port;
    // struct in_addr sin_addr; ... }`: port is big-endian at offset 2,
    // IPv4 address is four bytes at offset 4, matching lwip's layout.
    let port = u16::from_be_bytes([mem.read8(addr_ptr + 2), mem.read8(addr_ptr + 3)]);
    let octets = [mem.read8(addr_ptr + 4), mem.read8(addr_ptr + 5), mem.read8(addr_ptr + 6), mem.read8(addr_ptr + 7)];
    SocketAddrV4::new(Ipv4Addr::from(octets), port)
}

pub fn register(ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    register_lifecycle(syms, hooks);
    register_sockets(ctx, syms, hooks);
}

fn register_lifecycle(syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    for name in ["esp_wifi_init", "esp_wifi_set_mode", "esp_wifi_set_config", "esp_wifi_start", "esp_wifi_connect", "esp_wifi_stop"] {
        install(hooks, syms, name, Box::new(|regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            regs.ar_write(2, ESP_OK);
        }));
    }

    install(hooks, syms, "esp_wifi_get_mode", Box::new(|regs: &mut RegisterFile, mem: &mut AddressSpace| {
        const WIFI_MODE_STA: u32 = 1;
        let out_ptr = regs.ar_read(2);
        mem.write32(out_ptr, WIFI_MODE_STA);
        regs.ar_write(2, ESP_OK);
    }));

    // `esp_wifi_connect` alone doesn't tell the caller *when* the link
    // comes up; ESP-IDF firmware instead waits on the
    // `WIFI_EVENT_STA_CONNECTED`/`IP_EVENT_STA_GOT_IP` event group bits.
    // Reporting "already connected" synchronously from
    // `esp_netif_get_ip_info` lets firmware that polls rather than
    // event-waits observe success without modeling the event loop itself.
    install(hooks, syms, "esp_netif_get_ip_info", Box::new(|regs: &mut RegisterFile, mem: &mut AddressSpace| {
        // `esp_netif_ip_info_t { esp_ip4_addr_t ip, netmask, gw; }`, three
        // packed 4-byte fields.
        let ip_info_ptr = regs.ar_read(3);
        mem.write_buf(ip_info_ptr, &Ipv4Addr::new(192, 168, 4, 2).octets());
        mem.write_buf(ip_info_ptr + 4, &Ipv4Addr::new(255, 255, 255, 0).octets());
        mem.write_buf(ip_info_ptr + 8, &Ipv4Addr::new(192, 168, 4, 1).octets());
        regs.ar_write(2, ESP_OK);
    }));
}

fn register_sockets(ctx: &Arc<StubContext>, syms: Option<&SymbolTable>, hooks: &mut HookTable) {
    install(hooks, syms, "socket", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            let (family, kind) = (regs.ar_read(2), regs.ar_read(3));
            if family != AF_INET {
                regs.ar_write(2, ESP_FAIL);
                return;
            }
            match kind {
                SOCK_DGRAM => match UdpSocket::bind("0.0.0.0:0") {
                    Ok(sock) => regs.ar_write(2, ctx.sockets.insert(Mutex::new(Socket::Udp(sock)))),
                    Err(_) => regs.ar_write(2, ESP_FAIL),
                },
                SOCK_STREAM => regs.ar_write(2, ctx.sockets.insert(Mutex::new(Socket::TcpPending))),
                _ => regs.ar_write(2, ESP_FAIL),
            }
        }
    }));

    install(hooks, syms, "connect", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, mem: &mut AddressSpace| {
            let (fd, addr_ptr) = (regs.ar_read(2), regs.ar_read(3));
            let target = sockaddr_in_to_std(mem, addr_ptr);
            let Some(slot) = ctx.sockets.get(fd) else {
                regs.ar_write(2, ESP_FAIL);
                return;
            };
            match TcpStream::connect(target) {
                Ok(stream) => {
                    *slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Socket::Tcp(stream);
                    regs.ar_write(2, ESP_OK);
                }
                Err(_) => regs.ar_write(2, ESP_FAIL),
            }
        }
    }));

    install(hooks, syms, "send", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, mem: &mut AddressSpace| {
            let (fd, buf_ptr, len) = (regs.ar_read(2), regs.ar_read(3), regs.ar_read(4));
            let data = mem.read_buf(buf_ptr, len as usize);
            let Some(slot) = ctx.sockets.get(fd) else {
                regs.ar_write(2, ESP_FAIL);
                return;
            };
            let mut guard = slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let result = match &mut *guard {
                Socket::Tcp(stream) => stream.write_all(&data).map(|()| data.len()),
                Socket::Udp(sock) => sock.send(&data),
                Socket::TcpPending => Err(std::io::Error::other("socket not connected")),
            };
            regs.ar_write(2, result.map_or(ESP_FAIL, |n| n as u32));
        }
    }));

    install(hooks, syms, "recv", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, mem: &mut AddressSpace| {
            let (fd, buf_ptr, len) = (regs.ar_read(2), regs.ar_read(3), regs.ar_read(4));
            let Some(slot) = ctx.sockets.get(fd) else {
                regs.ar_write(2, ESP_FAIL);
                return;
            };
            let mut guard = slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let mut buf = vec![0u8; len as usize];
            let result = match &mut *guard {
                Socket::Tcp(stream) => stream.read(&mut buf),
                Socket::Udp(sock) => sock.recv(&mut buf),
                Socket::TcpPending => Err(std::io::Error::other("socket not connected")),
            };
            match result {
                Ok(n) => {
                    mem.write_buf(buf_ptr, &buf[..n]);
                    regs.ar_write(2, n as u32);
                }
                Err(_) => regs.ar_write(2, ESP_FAIL),
            }
        }
    }));

    install(hooks, syms, "sendto", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, mem: &mut AddressSpace| {
            let (fd, buf_ptr, len, addr_ptr) = (regs.ar_read(2), regs.ar_read(3), regs.ar_read(4), regs.ar_read(6));
            let data = mem.read_buf(buf_ptr, len as usize);
            let target = sockaddr_in_to_std(mem, addr_ptr);
            let Some(slot) = ctx.sockets.get(fd) else {
                regs.ar_write(2, ESP_FAIL);
                return;
            };
            let guard = slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let result = match &*guard {
                Socket::Udp(sock) => sock.send_to(&data, target),
                Socket::Tcp(_) | Socket::TcpPending => {
                    regs.ar_write(2, ESP_FAIL);
                    return;
                }
            };
            regs.ar_write(2, result.map_or(ESP_FAIL, |n| n as u32));
        }
    }));

    install(hooks, syms, "close", Box::new({
        let ctx = Arc::clone(ctx);
        move |regs: &mut RegisterFile, _mem: &mut AddressSpace| {
            ctx.sockets.remove(regs.ar_read(2));
            regs.ar_write(2, ESP_OK);
        }
    }));
}
