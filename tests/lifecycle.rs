mod common;

use common::{ConnectBehavior, MockConnector, TIP_HEIGHT, empty_fixture, fixture};
use fcli::electrum::ClientError;
use fcli::wallet::{WalletError, WalletServiceError, WalletStore};
use fcli::wallet::sync::ServiceState;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn stop_without_session_is_a_noop() {
	let f = fixture(MockConnector::new()).await;

	f.service.stop().await;
	f.service.stop().await;

	assert!(!f.service.is_synced());
	assert_eq!(f.service.state(), ServiceState::Idle);
	assert_eq!(f.connector.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn sync_flag_follows_session_lifecycle() {
	let f = fixture(MockConnector::new()).await;
	assert!(!f.service.is_synced());

	let snapshot = f.service.synchronize(true).await.unwrap();
	assert_eq!(snapshot.height, TIP_HEIGHT);
	assert!(f.service.is_synced());
	assert_eq!(f.service.state(), ServiceState::Watching);
	assert_eq!(f.service.gauge().active(), 1);
	assert_eq!(snapshot, f.connector.last_client().tip_snapshot());

	// The wallet catches up with the provider tip in the background.
	tokio::time::sleep(Duration::from_millis(10)).await;
	assert_eq!(f.service.current_wallet_block().unwrap(), snapshot);
	assert!(f.store.is_chain_attached());

	f.service.stop().await;
	assert!(!f.service.is_synced());
	assert_eq!(f.service.state(), ServiceState::Idle);
	assert_eq!(f.service.gauge().active(), 0);
	assert_eq!(f.connector.last_client().shutdowns(), 1);
	assert!(!f.store.is_chain_attached());

	// A second stop after teardown changes nothing.
	f.service.stop().await;
	assert_eq!(f.connector.last_client().shutdowns(), 1);
}

#[tokio::test(start_paused = true)]
async fn resynchronizing_joins_the_previous_watcher() {
	let f = fixture(MockConnector::new()).await;

	f.service.synchronize(true).await.unwrap();
	f.service.synchronize(true).await.unwrap();

	let gauge = f.service.gauge();
	assert_eq!(gauge.started(), 2);
	assert_eq!(gauge.active(), 1);
	assert_eq!(gauge.peak(), 1);
	assert_eq!(f.connector.client(0).shutdowns(), 1);
	assert_eq!(f.connector.client(1).shutdowns(), 0);
	assert!(f.service.is_synced());

	f.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_synchronize_and_stop_never_overlap_watchers() {
	let f = fixture(MockConnector::new()).await;
	f.service.synchronize(true).await.unwrap();

	let (first, second, _) = tokio::join!(
		f.service.synchronize(true),
		f.service.synchronize(true),
		f.service.stop(),
	);
	first.unwrap();
	second.unwrap();

	assert_eq!(f.service.gauge().peak(), 1);
	assert!(f.service.gauge().active() <= 1);
	assert_eq!(f.service.is_synced(), f.service.gauge().active() == 1);

	f.service.stop().await;
	assert_eq!(f.service.gauge().active(), 0);
}

#[tokio::test(start_paused = true)]
async fn refused_connection_leaves_wallet_open_and_unsynced() {
	let f = fixture(MockConnector::new()).await;
	f.connector.set_behavior(ConnectBehavior::Refuse);

	let err = f.service.synchronize(true).await.unwrap_err();
	assert!(matches!(
		err,
		WalletServiceError::Connection(ClientError::Refused(_))
	));
	assert!(!f.service.is_synced());
	assert!(f.service.is_opened());
	assert_eq!(f.service.state(), ServiceState::Idle);
	assert_eq!(f.service.gauge().started(), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_wallet_fails_before_connecting() {
	let f = empty_fixture(MockConnector::new());

	let err = f.service.synchronize(true).await.unwrap_err();
	assert!(matches!(
		err,
		WalletServiceError::OpenFailed(WalletError::NotFound(_))
	));
	assert!(!f.service.is_synced());
	assert!(!f.service.is_opened());
	assert_eq!(f.connector.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn unreachable_server_times_out_after_ten_seconds() {
	let f = fixture(MockConnector::new()).await;
	f.connector.set_behavior(ConnectBehavior::Hang);

	let started = Instant::now();
	let err = f.service.synchronize(true).await.unwrap_err();
	let elapsed = started.elapsed();

	assert!(matches!(
		err,
		WalletServiceError::Connection(ClientError::ConnectionTimeout(_))
	));
	assert!(elapsed >= Duration::from_secs(10));
	assert!(elapsed < Duration::from_millis(10_500));
	assert!(!f.service.is_synced());
}

#[tokio::test(start_paused = true)]
async fn fee_queries_need_an_active_session() {
	let f = fixture(MockConnector::new()).await;

	assert!(matches!(
		f.service.relay_fee().await,
		Err(WalletServiceError::Wallet(WalletError::NotLoaded))
	));

	f.service.open().await.unwrap();
	let err = f.service.estimate_fee(6).await.unwrap_err();
	assert!(err.is_expected_shutdown());

	f.service.synchronize(true).await.unwrap();
	assert_eq!(f.service.relay_fee().await.unwrap(), 0.00001);
	assert!(f.service.estimate_fee(2).await.unwrap() > 0.0);
	f.service.stop().await;
}

#[tokio::test]
async fn create_keeps_existing_wallet() {
	let f = fixture(MockConnector::new()).await;

	let err = f.service.create(b"secret", 32, "other").await.unwrap_err();
	assert!(matches!(
		err,
		WalletServiceError::Wallet(WalletError::AlreadyExists(_))
	));
	assert!(f.store.exists().await.unwrap());
}

#[tokio::test]
async fn restore_by_hex_opens_the_wallet() {
	let f = empty_fixture(MockConnector::new());

	assert!(matches!(
		f.service.restore_by_hex("zz", b"secret", "bad").await,
		Err(WalletServiceError::InvalidSeed(_))
	));

	let seed = "0F".repeat(32);
	let restored = f
		.service
		.restore_by_hex(&seed, b"secret", "restored")
		.await
		.unwrap();
	assert_eq!(restored.hex, "0f".repeat(32));
	assert_eq!(restored.words.len(), 24);
	assert!(f.service.is_opened());
	assert_eq!(f.service.balance(), 0);

	let first = f.service.next_address().await.unwrap();
	assert_eq!(first.index, 0);
	// Legacy P2PKH on a test network.
	assert!(first.address.starts_with('m') || first.address.starts_with('n'));
	assert_eq!(f.service.last_address().unwrap(), first);
	assert_eq!(f.service.account_addresses().unwrap(), vec![first]);
}

#[tokio::test]
async fn mnemonic_restores_the_same_wallet_as_hex() {
	let created = empty_fixture(MockConnector::new());
	let seed = created
		.service
		.create(b"secret", 16, "primary")
		.await
		.unwrap();
	assert_eq!(seed.words.len(), 12);
	let address = created.service.next_address().await.unwrap();
	let xpub = created.service.xpub(0).unwrap();
	assert_eq!(xpub.address.index, 0);
	assert_eq!(xpub.address, address);

	let restored = empty_fixture(MockConnector::new());
	assert!(matches!(
		restored
			.service
			.restore_by_mnemonic("not a mnemonic", b"secret", "bad")
			.await,
		Err(WalletServiceError::Wallet(WalletError::InvalidMnemonic(_)))
	));
	let again = restored
		.service
		.restore_by_mnemonic(&seed.words.join(" "), b"secret", "restored")
		.await
		.unwrap();
	assert_eq!(again, seed);
	assert_eq!(restored.service.next_address().await.unwrap(), address);
	assert_eq!(restored.service.xpub(0).unwrap().xpub, xpub.xpub);
}

#[tokio::test]
async fn accounts_overview_lists_balance_and_addresses() {
	let f = fixture(MockConnector::new()).await;
	f.service.open().await.unwrap();
	f.service.next_address().await.unwrap();
	f.service.next_address().await.unwrap();

	let overview = f.service.accounts().unwrap();
	assert_eq!(overview.block.height, 0);
	assert_eq!(overview.accounts.len(), 1);
	let summary = &overview.accounts[0];
	assert_eq!(summary.account.account_number, f.service.params().account_id);
	assert_eq!(summary.balance, 0);
	assert_eq!(summary.addresses.len(), 2);
	assert_eq!(summary.addresses, f.service.account_addresses().unwrap());
}
