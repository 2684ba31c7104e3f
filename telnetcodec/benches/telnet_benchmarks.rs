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

//! Benchmarks for telnet codec throughput on serial-sized traffic

use bytes::{Bytes, BytesMut};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serbridge_telnetcodec::{ComPortCommand, TelnetCodec, TelnetFrame, escape_iac};
use tokio_util::codec::{Decoder, Encoder};

// ============================================================================
// Encoding Benchmarks
// ============================================================================

fn bench_escape(c: &mut Criterion) {
    let mut group = c.benchmark_group("escape_iac");

    for size in [64usize, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let data: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
            let mut buffer = BytesMut::with_capacity(size * 2);
            b.iter(|| {
                buffer.clear();
                escape_iac(black_box(&data), &mut buffer);
            });
        });
    }

    group.finish();
}

fn bench_encode_notification(c: &mut Criterion) {
    c.bench_function("encode_modemstate", |b| {
        let mut codec = TelnetCodec::server();
        let mut buffer = BytesMut::with_capacity(64);
        b.iter(|| {
            buffer.clear();
            codec
                .encode(
                    black_box(TelnetFrame::ComPort(ComPortCommand::NotifyModemState(0x31))),
                    &mut buffer,
                )
                .unwrap();
        });
    });
}

// ============================================================================
// Decoding Benchmarks
// ============================================================================

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for size in [64usize, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("plain", size), size, |b, &size| {
            let data = Bytes::from(vec![b'A'; size]);
            let mut codec = TelnetCodec::server();
            b.iter(|| {
                let mut src = BytesMut::from(&data[..]);
                while let Some(event) = codec.decode(&mut src).unwrap() {
                    black_box(event);
                }
            });
        });
        group.bench_with_input(BenchmarkId::new("binary", size), size, |b, &size| {
            let raw: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
            let mut wire = BytesMut::new();
            escape_iac(&raw, &mut wire);
            let wire = wire.freeze();
            let mut codec = TelnetCodec::server();
            b.iter(|| {
                let mut src = BytesMut::from(&wire[..]);
                while let Some(event) = codec.decode(&mut src).unwrap() {
                    black_box(event);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_escape, bench_encode_notification, bench_decode);
criterion_main!(benches);
