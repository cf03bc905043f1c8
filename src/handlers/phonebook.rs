//! The phonebook endpoint: `(Root, "listPeeps")` fetches the public listing
//! from the account store and answers with a `listing` message, then the
//! connection closes.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::challenge::ChallengeMechanism;
use crate::context::AppContext;
use crate::error::AppResult;
use crate::handlers::connection::ConnectionHandler;
use crate::message::ServerMessage;
use crate::task::{early, FailurePolicy, StepOutcome, Task, TaskEnd};

struct PhonebookCtx {
    app: AppContext,
}

pub async fn handle_list_peeps(handler: &mut ConnectionHandler, app: &AppContext) {
    let mut ctx = PhonebookCtx { app: app.clone() };

    let task =
        Task::new("phonebook", FailurePolicy::Fatal).step("fetch_listing", fetch_listing);

    let reply = match task.run(&mut ctx).await {
        Ok(TaskEnd::Returned(msg)) => msg,
        Ok(_) => {
            tracing::error!("phonebook task completed without a listing");
            ServerMessage::challenge(ChallengeMechanism::ServerProblemTryAgainLater)
        }
        Err(err) => {
            err.log();
            ServerMessage::challenge(ChallengeMechanism::ServerProblemTryAgainLater)
        }
    };

    handler.terminal(&reply).await;
}

fn fetch_listing(ctx: &mut PhonebookCtx) -> BoxFuture<'_, AppResult<StepOutcome<ServerMessage>>> {
    async move {
        let blobs = ctx.app.store.scan_public_listing().await?;
        early(ServerMessage::Listing {
            self_ident_blobs: blobs,
        })
    }
    .boxed()
}
