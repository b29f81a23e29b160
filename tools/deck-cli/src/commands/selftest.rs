//! End-to-end check of the session lifecycle against an in-memory store.

use std::sync::Arc;

use anyhow::{ensure, Context as _, Result};
use deck_auth::{AuthError, AuthService, RoleSet};
use deck_store::{MemoryStore, SharedStore};

use super::secret::generate_secret;
use crate::context::Context;

const TOTAL: usize = 5;
const EMAIL: &str = "selftest@example.invalid";

/// Run the selftest command.
pub async fn run(ctx: &Context) -> Result<()> {
    let config = ctx.validated_config()?.clone();
    let store: SharedStore = Arc::new(MemoryStore::new());
    let auth = AuthService::new(config, store)?;
    let password = generate_secret(12);

    ctx.output.header("Session lifecycle selftest");

    ctx.output.step(1, TOTAL, "Start an anonymous session");
    let anonymous = auth.start_session().await?;
    ensure!(
        !anonymous.session.authenticated && anonymous.session.roles == RoleSet::guest(),
        "anonymous session should be an unauthenticated guest"
    );

    ctx.output.step(2, TOTAL, "Register and log in");
    let user = auth
        .register(EMAIL, &password)
        .await
        .context("registration failed")?;
    let issued = auth
        .login(EMAIL, &password, Some(anonymous.session.session_id.as_str()))
        .await
        .context("login failed")?;
    ensure!(
        auth.sessions()
            .get(anonymous.session.session_id.as_str())
            .await?
            .is_none(),
        "login should replace the anonymous session"
    );

    ctx.output.step(3, TOTAL, "Verify the access token");
    let claims = auth
        .codec()
        .verify_access(Some(&issued.access_token))
        .context("fresh access token did not verify")?;
    ensure!(claims.authenticated, "access token should be authenticated");

    ctx.output.step(4, TOTAL, "Change roles and refresh");
    auth.set_user_roles(&user.id, &RoleSet::admin()).await?;
    let refreshed = auth.refresh(Some(&issued.refresh_token)).await?;
    let claims = auth
        .codec()
        .verify_access(Some(&refreshed.access_token))
        .context("refreshed access token did not verify")?;
    ensure!(claims.roles.is_admin(), "refresh should carry the new roles");

    ctx.output.step(5, TOTAL, "Force logout and refresh again");
    auth.force_logout(issued.session.session_id.as_str()).await?;
    let rejected = auth.refresh(Some(&issued.refresh_token)).await;
    ensure!(
        matches!(rejected, Err(AuthError::TokenInvalid)),
        "refresh after forced logout should be rejected"
    );

    ctx.output.success("Session lifecycle works with this configuration");
    if ctx.output.is_json() {
        ctx.output.json(&serde_json::json!({ "ok": true, "steps": TOTAL }));
    }
    Ok(())
}
