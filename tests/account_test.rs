/// Account lifecycle through the WalletManager
///
/// Covers listing, reconfiguration, default selection, removal and
/// re-adding an account from its seed.
mod common;

use claim_wallet::{AccountListOptions, AccountSettings, Branch, WalletError};
use common::TestEnvironment;

#[tokio::test]
async fn test_account_commands() -> anyhow::Result<()> {
    let env = TestEnvironment::new("account_commands")?;
    let manager = &env.manager;

    let first = manager
        .account_create("Account 1", &AccountSettings::default())
        .await?;
    assert!(first.is_default);

    let listing = manager.account_list(&AccountListOptions::default()).await?;
    assert_eq!(listing.total, 1);
    let account = &listing.items[0];
    assert_eq!(account.id, first.id);
    assert_eq!(account.name, "Account 1");
    assert_eq!(account.receiving.gap, 20);
    assert_eq!(account.receiving.maximum_uses_per_address, 1);
    assert_eq!(account.change.gap, 6);
    assert!(account.seed.is_none());

    // reconfigure the generators
    let updated = manager
        .account_set(
            &first.id,
            &AccountSettings {
                receiving_gap: Some(95),
                receiving_max_uses: Some(96),
                change_gap: Some(97),
                change_max_uses: Some(98),
                ..AccountSettings::default()
            },
        )
        .await?;
    assert_eq!(updated.receiving.gap, 95);
    assert_eq!(updated.receiving.maximum_uses_per_address, 96);
    assert_eq!(updated.change.gap, 97);
    assert_eq!(updated.change.maximum_uses_per_address, 98);

    // new accounts are appended and not default
    let second = manager
        .account_create("Account 2", &AccountSettings::default())
        .await?;
    assert!(!second.is_default);
    let listing = manager.account_list(&AccountListOptions::default()).await?;
    let ids: Vec<&str> = listing.items.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);

    // a new default moves to the front
    manager
        .account_set(
            &second.id,
            &AccountSettings {
                default: Some(true),
                new_name: Some("Renamed".into()),
                ..AccountSettings::default()
            },
        )
        .await?;
    let listing = manager.account_list(&AccountListOptions::default()).await?;
    assert_eq!(listing.items[0].id, second.id);
    assert!(listing.items[0].is_default);
    assert_eq!(listing.items[0].name, "Renamed");
    assert!(!listing.items[1].is_default);

    // filtered listing with secrets
    let only = manager
        .account_list(&AccountListOptions {
            account_id: Some(second.id.clone()),
            show_seed: true,
            include_claims: true,
        })
        .await?;
    assert_eq!(only.total, 1);
    let seed = only.items[0].seed.clone().expect("seed shown");
    assert_eq!(only.items[0].balance, Some(0));

    let addresses_before = manager.address_list(Some(&second.id)).await?;
    let key_before = manager.generate_channel_key(Some(&second.id)).await?;

    // removing the default promotes the first remaining account
    let removed = manager.account_remove(&second.id).await?;
    assert_eq!(removed.id, second.id);
    let listing = manager.account_list(&AccountListOptions::default()).await?;
    assert_eq!(listing.total, 1);
    assert_eq!(listing.items[0].id, first.id);
    assert!(listing.items[0].is_default);

    // re-adding from the seed reproduces identity, addresses and channel keys
    let readded = manager
        .account_add("Account 2 again", &seed, &AccountSettings::default())
        .await?;
    assert_eq!(readded.id, second.id);
    let addresses_after = manager.address_list(Some(&readded.id)).await?;
    let before: Vec<&str> = addresses_before.iter().map(|r| r.address.as_str()).collect();
    let after: Vec<&str> = addresses_after.iter().map(|r| r.address.as_str()).collect();
    assert_eq!(before, after);
    let key_after = manager.generate_channel_key(Some(&readded.id)).await?;
    assert_eq!(key_after.index(), key_before.index());
    assert_eq!(key_after.secret_hex(), key_before.secret_hex());

    Ok(())
}

#[tokio::test]
async fn test_account_errors() -> anyhow::Result<()> {
    let env = TestEnvironment::new("account_errors")?;
    let manager = &env.manager;
    let account = manager
        .account_create("Main", &AccountSettings::default())
        .await?;
    let seed = manager
        .account_list(&AccountListOptions {
            show_seed: true,
            ..AccountListOptions::default()
        })
        .await?
        .items[0]
        .seed
        .clone()
        .expect("seed shown");

    let duplicate = manager
        .account_add("Again", &seed, &AccountSettings::default())
        .await;
    assert!(matches!(duplicate, Err(WalletError::Conflict(_))));

    let unknown = "mzBc4XEFSdzCDcTxAgf6EZXgsZWpztRhef";
    assert!(matches!(
        manager.account_remove(unknown).await,
        Err(WalletError::NotFound(_))
    ));
    assert!(matches!(
        manager
            .account_set(unknown, &AccountSettings { new_name: Some("x".into()), ..AccountSettings::default() })
            .await,
        Err(WalletError::NotFound(_))
    ));
    assert!(matches!(
        manager
            .account_set(unknown, &AccountSettings { default: Some(true), ..AccountSettings::default() })
            .await,
        Err(WalletError::Conflict(_))
    ));
    assert!(matches!(
        manager
            .account_list(&AccountListOptions {
                account_id: Some(unknown.into()),
                ..AccountListOptions::default()
            })
            .await,
        Err(WalletError::NotFound(_))
    ));

    let zero_gap = manager
        .account_set(
            &account.id,
            &AccountSettings {
                receiving_gap: Some(0),
                ..AccountSettings::default()
            },
        )
        .await;
    assert!(matches!(zero_gap, Err(WalletError::Validation(_))));

    let bad_seed = manager
        .account_add("Bad", "not a real seed phrase", &AccountSettings::default())
        .await;
    assert!(matches!(bad_seed, Err(WalletError::InvalidMnemonic(_))));
    Ok(())
}

#[tokio::test]
async fn test_unused_address_is_stable_until_used() -> anyhow::Result<()> {
    let env = TestEnvironment::new("unused_address")?;
    let account_id = env.funded_account("Main", 1).await?;

    let unused = env.manager.address_unused(Some(&account_id)).await?;
    assert_eq!(env.manager.address_unused(Some(&account_id)).await?, unused);

    env.ledger.fund(&unused, 1_000)?;
    env.manager.sync_accounts().await?;
    assert_ne!(env.manager.address_unused(Some(&account_id)).await?, unused);

    // the gap is kept after every use
    let records = env.manager.address_list(Some(&account_id)).await?;
    let receiving: Vec<_> = records.iter().filter(|r| r.branch == Branch::Receiving).collect();
    let last_used = receiving.iter().rposition(|r| r.used_times > 0).expect("used");
    assert!(receiving.len() - last_used - 1 >= 20);
    Ok(())
}

#[tokio::test]
async fn test_watch_only_account() -> anyhow::Result<()> {
    let env = TestEnvironment::new("watch_only")?;
    let spendable = env
        .manager
        .account_create("Spendable", &AccountSettings::default())
        .await?;

    let other = TestEnvironment::new("watch_only_source")?;
    let source = other
        .manager
        .account_create("Source", &AccountSettings::default())
        .await?;

    let watch = env
        .manager
        .account_add_keys("Watch", &source.public_key, &AccountSettings::default())
        .await?;
    assert!(watch.watch_only);
    assert_eq!(watch.id, source.id);
    assert_ne!(watch.id, spendable.id);

    assert_eq!(
        env.manager.address_unused(Some(&watch.id)).await?,
        other.manager.address_unused(Some(&source.id)).await?
    );
    let key = env.manager.generate_channel_key(Some(&watch.id)).await;
    assert!(matches!(key, Err(WalletError::Validation(_))));
    Ok(())
}
