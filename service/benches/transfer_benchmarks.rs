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

//! Benchmarks for the bridging hot paths

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use serbridge_service::testing::{MockHandle, MockTransport};
use serbridge_service::{
    BasicRenderer, ByteBuffer, ChardelayConfig, Controller, PortConfig, PortServices,
    RenderContext, SerialParams, StringRenderer, hexdump,
};
use tokio::runtime::Runtime;

const BLOCK: usize = 4096;

fn bench_byte_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("byte_buffer");
    let block = vec![0x55u8; BLOCK];
    group.throughput(Throughput::Bytes(BLOCK as u64));

    group.bench_function("append_and_drain", |b| {
        let mut buffer = ByteBuffer::new(BLOCK);
        b.iter(|| {
            buffer.reset();
            buffer.append(black_box(&block));
            while !buffer.is_drained() {
                let n = buffer.unsent().len().min(512);
                buffer.advance(n);
            }
        })
    });

    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let ctx = RenderContext {
        port: "console",
        device: "/dev/ttyUSB0",
        remote: Some("10.0.0.5:40000"),
        serial: SerialParams::default(),
    };
    c.bench_function("render_banner", |b| {
        b.iter(|| {
            BasicRenderer.render(
                black_box("\\p on \\d (\\s) for \\a\\r\\n\\x07"),
                black_box(&ctx),
            )
        })
    });
}

fn bench_hexdump(c: &mut Criterion) {
    let data: Vec<u8> = (0..=255u8).collect();
    c.bench_function("trace_hexdump", |b| b.iter(|| hexdump(black_box(&data))));
}

async fn pump(device: &MockHandle, client: &MockHandle, block: &[u8]) {
    device.push(block);
    let mut received = 0;
    while received < block.len() {
        received += client.take_written().len();
        tokio::task::yield_now().await;
    }
}

fn bench_dev_to_net(c: &mut Criterion) {
    let rt = Runtime::new().expect("failed to create runtime");
    let transport = MockTransport::new();
    let controller = Controller::new(PortServices::new(transport.clone()));
    let device = transport.device("/dev/bench");

    let client = rt.block_on(async {
        controller
            .add_port(
                PortConfig::new("bench", "127.0.0.1:7000", "/dev/bench")
                    .with_chardelay(ChardelayConfig::disabled())
                    .with_buffer_size(BLOCK),
            )
            .expect("add port");
        while !transport.is_listening("127.0.0.1:7000") {
            tokio::task::yield_now().await;
        }
        transport
            .connect_client("127.0.0.1:7000", "10.0.0.1:1000")
            .expect("connect")
    });

    let block = vec![0x41u8; BLOCK];
    let mut group = c.benchmark_group("dev_to_net");
    group.throughput(Throughput::Bytes(BLOCK as u64));
    group.bench_function("raw_block", |b| {
        b.to_async(&rt).iter(|| pump(&device, &client, &block))
    });
    group.finish();

    rt.block_on(controller.shutdown_all());
}

criterion_group!(
    benches,
    bench_byte_buffer,
    bench_render,
    bench_hexdump,
    bench_dev_to_net
);
criterion_main!(benches);
