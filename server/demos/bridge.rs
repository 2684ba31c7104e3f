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

//! Bridge one serial device to a Telnet port.
//!
//! ```text
//! cargo run --example bridge -- 3001 /dev/ttyUSB0 [name]
//! ```
//!
//! Connect with `telnet localhost 3001`. Set `RUST_LOG=debug` for more detail.

use serbridge_server::{BridgeServer, ServerConfig};
use serbridge_service::PortConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let accepter = args.next().unwrap_or_else(|| "3001".to_string());
    let device = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let name = args.next().unwrap_or_else(|| "console".to_string());

    println!("Bridging {} on {}", device, accepter);
    println!("Press Ctrl+C to stop\n");

    let config = ServerConfig::default().with_port(
        PortConfig::new(name, accepter, device)
            .with_telnet(true)
            .with_banner("\\p on \\d [\\s]\\r\\n"),
    );
    let server = BridgeServer::start(config)?;
    server.run_until_ctrl_c().await?;
    Ok(())
}
