//! Secret generation and password hashing.

use anyhow::{bail, Context as _, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use deck_auth::config::MIN_SECRET_LEN;
use deck_auth::PasswordHasher;
use rand::RngCore;

use super::{GenSecretArgs, HashPasswordArgs};
use crate::context::Context;

/// Random URL-safe secret from `bytes` random bytes.
pub fn generate_secret(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Run the gen-secret command.
pub async fn gen_secret(args: GenSecretArgs, ctx: &Context) -> Result<()> {
    // 24 bytes encode to exactly MIN_SECRET_LEN characters.
    if args.bytes * 4 / 3 < MIN_SECRET_LEN {
        bail!(
            "--bytes {} is too short; the encoded secret must be at least {} characters",
            args.bytes,
            MIN_SECRET_LEN
        );
    }
    ctx.output.raw(&generate_secret(args.bytes));
    Ok(())
}

/// Run the hash-password command.
pub async fn hash_password(args: HashPasswordArgs, ctx: &Context) -> Result<()> {
    let password = match args.password {
        Some(password) => password,
        None => dialoguer::Password::new()
            .with_prompt("Password")
            .with_confirmation("Confirm password", "Passwords do not match")
            .interact()
            .context("Failed to read password")?,
    };
    if password.is_empty() {
        bail!("Password must not be empty");
    }

    let hash = PasswordHasher::new().hash(&password)?;

    if args.roles.is_empty() {
        ctx.output.raw(&hash);
        return Ok(());
    }

    if ctx.output.is_json() {
        ctx.output
            .json(&serde_json::json!({ "roles": args.roles, "password_hash": hash }));
    } else {
        let roles: Vec<String> = args.roles.iter().map(|r| format!("{:?}", r)).collect();
        println!("[[unlock.grants]]");
        println!("roles = [{}]", roles.join(", "));
        println!("password_hash = {:?}", hash);
    }
    Ok(())
}
