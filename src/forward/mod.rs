// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Forwarders: the three fan-out services that create channels in response to external
//! triggers rather than peer-initiated opens. The accept loops, bind
//! sockets and platform socket glue (APR, agent UDS, local X11 displays)
//! are external collaborators — the core only specifies the contract they
//! exercise against the dispatcher: allocate a channel, hand it its type
//! payload, and unregister it when the external side goes away.

pub mod agent;
pub mod tcpip;
pub mod x11;

pub use agent::AgentForwarder;
pub use tcpip::TcpIpForwarder;
pub use x11::X11Forwarder;

/// A sub-service with its own lifecycle, shut down sequentially (graceful)
/// or concurrently (immediate) by the [`crate::close::CloseCoordinator`].
#[async_trait::async_trait]
pub trait Forwarder: Send + Sync {
    /// Release whatever external resource this forwarder holds (accept
    /// socket, UDS listener, X11 display registration). Idempotent.
    async fn shutdown(&self);
}
