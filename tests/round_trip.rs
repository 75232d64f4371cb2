// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{path::Path, sync::Arc, time::Duration};

use swarm_archiver::{
    ArchiveOptions, Archiver, Distributor, DownloadStatus,
    store::{FileStore, StoreConfig},
    swarm::{DownloadConfig, LocalSwarm},
    utils::RetryConfig,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn write(root: &Path, relative: &str, bytes: &[u8]) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

fn store(root: &Path) -> Arc<FileStore> {
    Arc::new(
        FileStore::with_config(StoreConfig {
            root: root.to_path_buf(),
            chunk_size: 4096,
            manifest_dir: None,
        })
        .unwrap(),
    )
}

fn retry() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn archive_advertise_download() {
    let seed_dir = TempDir::new().unwrap();
    let leech_dir = TempDir::new().unwrap();
    let photo = (0..150_000u32)
        .map(|i| (i * 7 % 251) as u8)
        .collect::<Vec<_>>();
    write(seed_dir.path(), "photos/a.jpg", &photo);
    write(seed_dir.path(), "photos/album/notes.txt", b"holiday");
    write(seed_dir.path(), "photos/album/empty", b"");
    write(seed_dir.path(), "photos/.cache", b"skip me");

    let swarm = LocalSwarm::new();
    let cancel = CancellationToken::new();

    let seed_store = store(seed_dir.path());
    let archive = Archiver::new(seed_store.clone())
        .archive(
            "photos",
            ArchiveOptions::default().filter(|name| !name.starts_with('.')),
            &cancel,
        )
        .await
        .unwrap();
    let seeder = Distributor::new(seed_store, Arc::new(swarm.peer()));
    let address = seeder.advertise(&archive).await.unwrap();
    assert_eq!(address, archive.address());

    let (tx, rx) = flume::unbounded();
    let leecher = Distributor::new(store(leech_dir.path()), Arc::new(swarm.peer()))
        .with_config(DownloadConfig { concurrency: 2 }, retry())
        .unwrap()
        .with_progress_listener(tx);
    let report = leecher
        .download(&address.to_string().parse().unwrap(), &cancel)
        .await
        .unwrap();

    assert_eq!(report.status(), DownloadStatus::Complete);
    assert_eq!(report.entries, 3);
    assert_eq!(report.downloaded, vec![0, 1, 2]);
    assert_eq!(report.total_bytes, Some(archive.total_size()));
    assert_eq!(report.bytes_received, archive.total_size());
    for entry in archive.entries() {
        assert_eq!(
            std::fs::read(entry.local_path(leech_dir.path())).unwrap(),
            std::fs::read(entry.local_path(seed_dir.path())).unwrap(),
            "{}",
            entry.path
        );
    }
    assert!(!leech_dir.path().join("photos/.cache").exists());

    let ratios = rx.try_iter().map(|event| event.ratio).collect::<Vec<_>>();
    assert_eq!(ratios.first(), Some(&0));
    assert_eq!(ratios.last(), Some(&100));
    assert!(ratios.iter().all(|r| r % 20 == 0));
    assert!(ratios.windows(2).all(|w| w[0] < w[1]), "{ratios:?}");

    // once the seeder is gone the leecher serves the archive on its own
    seeder.leave().await.unwrap();
    let third_dir = TempDir::new().unwrap();
    let third = Distributor::new(store(third_dir.path()), Arc::new(swarm.peer()))
        .with_config(DownloadConfig::default(), retry())
        .unwrap();
    let report = third.download(&address, &cancel).await.unwrap();
    assert_eq!(report.status(), DownloadStatus::Complete);
    assert_eq!(
        std::fs::read(third_dir.path().join("photos/a.jpg")).unwrap(),
        photo
    );
}

#[tokio::test]
async fn solo_archive_round_trip() {
    let seed_dir = TempDir::new().unwrap();
    let leech_dir = TempDir::new().unwrap();
    let source = seed_dir.path().join("outside.bin");
    std::fs::write(&source, vec![42; 10_000]).unwrap();

    let swarm = LocalSwarm::new();
    let cancel = CancellationToken::new();
    let seed_store = store(&seed_dir.path().join("store"));
    let archive = Archiver::new(seed_store.clone())
        .archive_solo(&source, "blob", &cancel)
        .await
        .unwrap();
    Distributor::new(seed_store, Arc::new(swarm.peer()))
        .advertise(&archive)
        .await
        .unwrap();

    let report = Distributor::new(store(leech_dir.path()), Arc::new(swarm.peer()))
        .with_config(DownloadConfig::default(), retry())
        .unwrap()
        .download(&archive.address(), &cancel)
        .await
        .unwrap();
    assert_eq!(report.status(), DownloadStatus::Complete);
    assert_eq!(
        std::fs::read(leech_dir.path().join("blob")).unwrap(),
        vec![42; 10_000]
    );
}
