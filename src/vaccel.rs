// SPDX-License-Identifier: GPL-2.0-or-later

//! Accelerator RPC plumbing over vsock. The guest-side vAccel agent dials the
//! host through a vsock device; the RPC address annotation is validated here
//! against the chosen monitor before any device flags are emitted.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Error, Result};

/// CIDs 0-2 are reserved; 2 addresses the host from the guest.
const HOST_CID: u32 = 2;
const GUEST_CID_BASE: u32 = 3;
/// Guest CIDs are drawn from a small prime-sized pool above the reserved
/// range so that distinct container ids rarely collide on one host.
const GUEST_CID_POOL: u32 = 97;

/// Derive the guest CID for a container. Deterministic, so sibling helper
/// processes compute the same CID without coordination.
pub fn id_to_guest_cid(container_id: &str) -> u32 {
    let sum: u32 = container_id.bytes().map(u32::from).sum();
    sum % GUEST_CID_POOL + GUEST_CID_BASE
}

/// A validated RPC endpoint. `address` is always of the uniform
/// `vsock://2:<port>` form; `socket_dir` is only set for monitors that need
/// the unix socket directory as a flag argument (firecracker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VsockEndpoint {
    pub address: String,
    pub socket_dir: String,
}

/// Validate `rpc_address` for `monitor` and normalize it.
///
/// qemu, cloud-hypervisor, hvt and spt take a `vsock://<cid>:<port>` address
/// with the host CID; it is returned unchanged. firecracker exposes vsock
/// through a unix socket, so its address must name `<dir>/vaccel.sock_<port>`;
/// the directory is returned separately and the address is rewritten to the
/// uniform vsock form.
pub fn validate_vsock_address(rpc_address: &str, monitor: &str) -> Result<VsockEndpoint> {
    lazy_static! {
        static ref VSOCK_PATTERN: Regex = Regex::new(r"^vsock://(\d+):(\d+)$").unwrap();
        static ref UNIX_PATTERN: Regex = Regex::new(r"^unix://(.+)/vaccel\.sock_(\d+)$").unwrap();
    }

    match monitor {
        "qemu" | "cloud-hypervisor" | "hvt" | "spt" => {
            let captures = VSOCK_PATTERN.captures(rpc_address).ok_or_else(|| {
                Error::InvalidAnnotation(format!(
                    "vsock address \"{rpc_address}\" is not of the form vsock://<cid>:<port>"
                ))
            })?;

            if captures[1].parse::<u32>().ok() != Some(HOST_CID) {
                return Err(Error::InvalidAnnotation(format!(
                    "vsock address \"{rpc_address}\" must use the reserved host CID {HOST_CID}"
                )));
            }

            Ok(VsockEndpoint {
                address: rpc_address.to_string(),
                socket_dir: String::new(),
            })
        }
        "firecracker" => {
            let captures = UNIX_PATTERN.captures(rpc_address).ok_or_else(|| {
                Error::InvalidAnnotation(format!(
                    "vsock address \"{rpc_address}\" is not of the form \
                     unix://<dir>/vaccel.sock_<port>"
                ))
            })?;

            Ok(VsockEndpoint {
                address: format!("vsock://{HOST_CID}:{}", &captures[2]),
                socket_dir: captures[1].to_string(),
            })
        }
        other => Err(Error::InvalidAnnotation(format!(
            "vsock is not supported for monitor \"{other}\""
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_case::test_case;

    #[test_case("", 3; "empty id maps to first free cid")]
    #[test_case("container123", 49; "simple id")]
    fn guest_cid_derivation(id: &str, expected: u32) {
        assert_eq!(id_to_guest_cid(id), expected);
    }

    #[test]
    fn guest_cid_is_never_reserved() {
        for id in ["", "a", "zz", "container123", "0123456789abcdef"] {
            assert!(id_to_guest_cid(id) >= GUEST_CID_BASE);
        }
    }

    #[test]
    fn qemu_vsock_address_is_returned_unchanged() {
        let endpoint = validate_vsock_address("vsock://2:1234", "qemu").unwrap();

        assert_eq!(endpoint.address, "vsock://2:1234");
        assert_eq!(endpoint.socket_dir, "");
    }

    #[test_case("vsock://3:1234"; "wrong cid")]
    #[test_case("vsock://2:"; "no port")]
    #[test_case("vsock://invalid"; "malformed")]
    #[test_case("http://localhost:1234"; "not a vsock address")]
    #[test_case(""; "empty address")]
    fn qemu_vsock_address_rejected(address: &str) {
        assert!(validate_vsock_address(address, "qemu").is_err());
    }

    #[test_case("unix:///tmp/vaccel.sock_1234", "/tmp", "vsock://2:1234"; "flat path")]
    #[test_case(
        "unix:///var/run/urunc/vaccel.sock_5678",
        "/var/run/urunc",
        "vsock://2:5678";
        "nested path"
    )]
    fn firecracker_address_is_rewritten(address: &str, dir: &str, rewritten: &str) {
        let endpoint = validate_vsock_address(address, "firecracker").unwrap();

        assert_eq!(endpoint.socket_dir, dir);
        assert_eq!(endpoint.address, rewritten);
    }

    #[test_case("unix:///tmp/test.sock"; "wrong socket name")]
    #[test_case("/tmp/vaccel.sock_1234"; "no unix prefix")]
    fn firecracker_address_rejected(address: &str) {
        assert!(validate_vsock_address(address, "firecracker").is_err());
    }

    #[test]
    fn unsupported_monitor_is_rejected() {
        assert!(validate_vsock_address("vsock://2:1234", "kvm").is_err());
    }
}
