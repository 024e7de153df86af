/// Deterministic channel keys shared by independent wallet instances
///
/// Two managers hold the same seed on the same chain. Keys must agree at
/// every index, the cursor must follow chain evidence, and a restarted
/// key manager must recover its cache by priming.
mod common;

use std::time::Duration;

use claim_wallet::{AccountListOptions, AccountSettings, ClaimRequest, ListFilter, COIN};
use common::TestEnvironment;

fn channel(name: &str) -> ClaimRequest {
    ClaimRequest {
        name: name.to_string(),
        amount: COIN / 100,
        account_id: None,
        funding_account_ids: Vec::new(),
        channel_id: None,
    }
}

#[tokio::test]
async fn test_deterministic_channel_keys() -> anyhow::Result<()> {
    let env = TestEnvironment::new("deterministic_channel_keys")?;
    let daemon1 = env.manager.clone();
    let account_id = env.funded_account("Shared", 10).await?;
    let seed = daemon1
        .account_list(&AccountListOptions {
            show_seed: true,
            ..AccountListOptions::default()
        })
        .await?
        .items[0]
        .seed
        .clone()
        .expect("seed shown");

    let daemon2 = env.second_instance()?;
    let copy = daemon2
        .account_add("Shared", &seed, &AccountSettings::default())
        .await?;
    assert_eq!(copy.id, account_id);

    // idempotent until used, identical across instances
    let first = daemon1.generate_channel_key(None).await?;
    assert_eq!(daemon1.generate_channel_key(None).await?, first);
    let mirrored = daemon2.generate_channel_key(None).await?;
    assert_eq!(mirrored.secret_hex(), first.secret_hex());
    assert_eq!(daemon1.channel_keys_last_known(None).await?, 0);

    // publishing promotes the key in the publishing instance
    let channel1 = daemon1.channel_create(channel("@channel1")).await?;
    env.mine(1);
    assert_eq!(daemon1.channel_keys_last_known(None).await?, 1);
    let second = daemon1.generate_channel_key(None).await?;
    assert_eq!(second.index(), 1);
    assert_ne!(second.secret_hex(), first.secret_hex());

    // the other instance learns it from the chain
    daemon2.sync_accounts().await?;
    assert_eq!(daemon2.channel_keys_last_known(None).await?, 1);
    let second_mirrored = daemon2.generate_channel_key(None).await?;
    assert_eq!(second_mirrored.secret_hex(), second.secret_hex());

    // daemon2 publishes with key #1 while daemon1 still holds it as pending
    daemon2.channel_create(channel("@channel2")).await?;
    env.mine(1);
    let channel3 = daemon1.channel_create(channel("@channel3")).await?;
    env.mine(1);
    assert_eq!(daemon1.channel_keys_last_known(None).await?, 3);

    daemon1.sync_accounts().await?;
    daemon2.sync_accounts().await?;
    assert_eq!(daemon2.channel_keys_last_known(None).await?, 3);

    let channels = daemon1.channel_list(&ListFilter::default()).await?;
    assert_eq!(channels.total, 3);
    assert!(channels.items.iter().all(|c| c.has_private_key));
    let keys: std::collections::HashSet<_> =
        channels.items.iter().map(|c| c.public_key_id.clone()).collect();
    assert_eq!(keys.len(), 3, "every channel signs with its own key");

    // a restarted key manager knows nothing until primed
    let account = daemon1.account(None).await?;
    account.channel_keys().reset().await;
    let channels = daemon1.channel_list(&ListFilter::default()).await?;
    assert!(channels.items.iter().all(|c| !c.has_private_key));

    assert_eq!(daemon1.ensure_channel_keys_primed(None).await?, 3);
    let channels = daemon1.channel_list(&ListFilter::default()).await?;
    assert!(channels.items.iter().all(|c| c.has_private_key));
    assert!(channels.items.iter().any(|c| c.claim_id == channel1.claim_id));
    assert!(channels.items.iter().any(|c| c.claim_id == channel3.claim_id));

    let next = daemon1.generate_channel_key(None).await?;
    assert_eq!(next.index(), 3);
    assert_eq!(daemon2.generate_channel_key(None).await?.secret_hex(), next.secret_hex());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_generation_yields_one_key() -> anyhow::Result<()> {
    let env = TestEnvironment::new("concurrent_channel_keys")?;
    env.manager
        .account_create("Main", &AccountSettings::default())
        .await?;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let manager = env.manager.clone();
            tokio::spawn(async move { manager.generate_channel_key(None).await })
        })
        .collect();

    let mut keys = Vec::new();
    for handle in handles {
        keys.push(handle.await??);
    }
    assert!(keys.iter().all(|k| *k == keys[0]));
    assert_eq!(env.manager.channel_keys_last_known(None).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_channels_get_distinct_keys() -> anyhow::Result<()> {
    let env = TestEnvironment::new("concurrent_channels")?;
    env.funded_account("Main", 10).await?;

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let manager = env.manager.clone();
            tokio::spawn(async move { manager.channel_create(channel(&format!("@parallel{}", i))).await })
        })
        .collect();
    for handle in handles {
        handle.await??;
    }
    env.mine(1);

    assert_eq!(env.manager.channel_keys_last_known(None).await?, 4);
    let channels = env.manager.channel_list(&ListFilter::default()).await?;
    assert_eq!(channels.total, 4);
    let keys: std::collections::HashSet<_> =
        channels.items.iter().map(|c| c.public_key_id.clone()).collect();
    assert_eq!(keys.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_unavailable_ledger_keeps_cursor() -> anyhow::Result<()> {
    let env = TestEnvironment::new("unavailable_channel_keys")?;
    env.manager
        .account_create("Main", &AccountSettings::default())
        .await?;

    env.ledger.set_online(false);
    let result = env.manager.generate_channel_key(None).await;
    assert!(matches!(result, Err(ref e) if e.is_retryable()));
    assert_eq!(env.manager.channel_keys_last_known(None).await?, 0);

    env.ledger.set_online(true);
    assert_eq!(env.manager.generate_channel_key(None).await?.index(), 0);
    Ok(())
}

#[tokio::test]
async fn test_watcher_picks_up_remote_channel() -> anyhow::Result<()> {
    let env = TestEnvironment::new("watcher")?;
    let daemon1 = env.manager.clone();
    env.funded_account("Shared", 10).await?;
    let seed = daemon1
        .account_list(&AccountListOptions {
            show_seed: true,
            ..AccountListOptions::default()
        })
        .await?
        .items[0]
        .seed
        .clone()
        .expect("seed shown");

    let daemon2 = env.second_instance()?;
    daemon2
        .account_add("Shared", &seed, &AccountSettings::default())
        .await?;
    daemon2.sync_accounts().await?;
    let watcher = daemon2.spawn_address_watcher().await?;

    daemon1.channel_create(channel("@watched")).await?;

    let mut caught_up = false;
    for _ in 0..100 {
        if daemon2.channel_keys_last_known(None).await? == 1 {
            caught_up = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    watcher.abort();
    assert!(caught_up, "watcher should observe the new channel");
    Ok(())
}
