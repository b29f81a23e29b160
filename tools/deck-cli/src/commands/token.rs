//! Token inspection.

use std::time::Duration;

use anyhow::{bail, Result};
use deck_auth::{peek_claims, RoleSet, SessionId, Subject, TokenCodec};
use deck_store::{Clock, SystemClock};
use serde_json::Value;

use super::{TokenArgs, TokenCommand};
use crate::context::Context;
use crate::output::format_timestamp;

/// Run the token command.
pub async fn run(args: TokenArgs, ctx: &Context) -> Result<()> {
    match args.command {
        TokenCommand::Inspect { token } => inspect(&token, ctx),
        TokenCommand::Verify { token, refresh } => verify(&token, refresh, ctx),
        TokenCommand::Issue {
            session,
            user,
            email,
            roles,
            authenticated,
            ttl,
        } => {
            let subject = Subject {
                session_id: session.unwrap_or_else(|| SessionId::generate().to_string()),
                user_id: user,
                email,
                roles: RoleSet::of(&roles),
                authenticated,
            };
            issue(&subject, ttl, ctx)
        }
    }
}

fn codec(ctx: &Context) -> Result<TokenCodec> {
    let config = ctx.validated_config()?;
    Ok(TokenCodec::new(&config.token, SystemClock::shared()))
}

fn inspect(token: &str, ctx: &Context) -> Result<()> {
    let claims = peek_claims(token)?;
    ctx.output.warn("Signature not checked");
    print_claims(&claims, ctx);
    Ok(())
}

fn verify(token: &str, refresh: bool, ctx: &Context) -> Result<()> {
    let codec = codec(ctx)?;
    let verdict = if refresh {
        codec
            .inspect_refresh(Some(token))
            .map(|claims| serde_json::to_value(claims).unwrap_or(Value::Null))
    } else {
        codec
            .inspect_access(Some(token))
            .map(|claims| serde_json::to_value(claims).unwrap_or(Value::Null))
    };

    match verdict {
        Ok(claims) => {
            ctx.output.success("Token is valid");
            print_claims(&claims, ctx);
            Ok(())
        }
        Err(rejection) => bail!("Token rejected: {}", rejection),
    }
}

fn issue(subject: &Subject, ttl: Option<u64>, ctx: &Context) -> Result<()> {
    let codec = codec(ctx)?;
    let token = match ttl {
        Some(secs) => codec.issue_access_with_ttl(subject, Duration::from_secs(secs))?,
        None => codec.issue_access(subject)?,
    };
    ctx.output.debug(&format!("Issued for session {}", subject.session_id));
    ctx.output.raw(&token);
    Ok(())
}

fn print_claims(claims: &Value, ctx: &Context) {
    if ctx.output.is_json() {
        ctx.output.json(claims);
        return;
    }

    let Some(map) = claims.as_object() else {
        ctx.output.kv("claims", &claims.to_string());
        return;
    };
    for (key, value) in map {
        let shown = match (key.as_str(), value.as_i64()) {
            ("iat" | "exp", Some(ts)) => format!("{} ({})", ts, format_timestamp(ts)),
            _ => match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        };
        ctx.output.kv(key, &shown);
    }

    if let Some(exp) = map.get("exp").and_then(Value::as_i64) {
        let now = SystemClock.now();
        if now >= exp {
            ctx.output.warn("Token has expired");
        } else {
            ctx.output
                .info(&format!("Expires in {}s", exp - now));
        }
    }
}
