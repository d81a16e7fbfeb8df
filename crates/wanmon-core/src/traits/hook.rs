// # Remediation Hook Trait
//
// Out-of-band remediation for backends that cannot control the WAN port
// themselves (SNMP is read-only). When a private address is detected and
// the configured remediation mode is `command`, the monitor invokes the
// hook instead of the built-in disconnect/reconnect state machine.
//
// The hook is fire-and-verify: the monitor still re-checks the address on
// the next poll tick; the hook itself reports only whether it could be
// executed.

use async_trait::async_trait;

use crate::error::Result;
use crate::traits::PortId;

/// Trait for out-of-band remediation implementations
#[async_trait]
pub trait RemediationHook: Send + Sync {
    /// Run the external remediation action for the given port
    ///
    /// # Errors
    ///
    /// [`Error::Control`](crate::Error::Control) when the action could not
    /// be executed. The monitor logs this and waits for the next tick; it
    /// never retries a hook in a tight loop.
    async fn run(&self, port: PortId) -> Result<()>;

    /// Short name for logging
    fn hook_name(&self) -> &'static str;
}
