//! VPC VPN Pivot - temporary AWS Client VPN endpoints for reaching private VPCs
//!
//! Given credentials and a subnet, this crate creates a certificate
//! authenticated Client VPN endpoint in the subnet's VPC, connects the local
//! machine to it with OpenVPN, and later tears everything down again.
//!
//! # Architecture
//!
//! - `state`: Durable record of every created resource (`~/.vpc_vpn_pivot/state`)
//! - `pivot`: The create and purge pipelines plus pre-flight validation
//! - `aws`: SigV4 client for EC2, ACM and STS behind the `NetworkApi` trait
//! - `pki`: Certificate generation with EasyRSA
//! - `openvpn`: OpenVPN client lifecycle (connect, disconnect, status)
//! - `config`: Configuration file handling (TOML)
//!
//! # Usage
//!
//! ```bash
//! vpc-vpn-pivot create --profile pentest --subnet-id subnet-0d326f29e157a5b79
//! sudo vpc-vpn-pivot connect
//! sudo vpc-vpn-pivot disconnect
//! vpc-vpn-pivot purge
//! ```

pub mod aws;
pub mod config;
pub mod error;
pub mod openvpn;
pub mod pivot;
pub mod pki;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::PivotError;
pub use state::StateStore;
