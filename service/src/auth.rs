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

//! Authentication gate consulted before a connection is admitted

use crate::endpoint::CandidateInfo;
use async_trait::async_trait;

/// Yes/no decision on a candidate connection.
///
/// Runs on its own task so a slow check never stalls the port.
#[async_trait]
pub trait AuthGate: Send + Sync {
    /// Whether the candidate may proceed to admission
    async fn authorize(&self, candidate: &CandidateInfo) -> bool;
}

/// Gate that lets everyone through
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl AuthGate for AllowAll {
    async fn authorize(&self, _candidate: &CandidateInfo) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyPort(&'static str);

    #[async_trait]
    impl AuthGate for DenyPort {
        async fn authorize(&self, candidate: &CandidateInfo) -> bool {
            candidate.port != self.0
        }
    }

    #[tokio::test]
    async fn test_gates() {
        let info = CandidateInfo {
            port: "lab".to_string(),
            remote_addr: None,
            remote: "unknown".to_string(),
        };
        assert!(AllowAll.authorize(&info).await);
        assert!(!DenyPort("lab").authorize(&info).await);
        assert!(DenyPort("console").authorize(&info).await);
    }
}
