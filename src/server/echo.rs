use async_trait::async_trait;
use log::debug;

use crate::common::codec::Codec;
use crate::common::error::Result;
use crate::common::handler::{Context, Handler};

/// Responder that sends every received value straight back to the peer.
///
/// Nothing is queued locally, so `receive` on an echo connection only ever yields the
/// closed sentinel.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

#[async_trait]
impl<C: Codec> Handler<C> for Echo {
    async fn on_message(&self, ctx: &Context<C>, item: C::Item) -> Result<()> {
        ctx.send(&item).await
    }

    async fn on_close(&self, ctx: &Context<C>) {
        debug!("🔁 echo to {:?} finished", ctx.peer_addr());
    }
}
