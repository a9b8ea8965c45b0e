//! Daemon tests: configuration files, snapshot publication and the socket
//! protocol end to end

#![cfg(unix)]

use bmc_firmware_update::{
    ActivationState, Association, ObjectPublisher, RelationKind, VersionId, VersionObject,
    VersionPurpose,
};
use bmc_update_service::{ServiceConfig, ServiceDaemon, SnapshotPublisher};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn service_config(root: &Path) -> ServiceConfig {
    let mut config = ServiceConfig {
        socket_path: root.join("run/updater.sock"),
        snapshot_path: root.join("run/objects.json"),
        systemctl: "true".into(),
        fw_printenv: "true".into(),
        ..ServiceConfig::default()
    };
    let updater = &mut config.updater;
    updater.upload_dir = root.join("images");
    updater.media_dir = root.join("media");
    updater.os_release_file = root.join("etc/os-release");
    updater.persist_dir = root.join("persist");
    updater.factory_reset_settle_secs = 0;
    updater.bmc.staging_dir = root.join("run/initramfs");
    updater.host.staging_dir = root.join("tmp");
    updater.host.release_file = None;
    updater.auxiliary.staging_dir = root.join("tmp");
    updater.auxiliary.release_file = None;
    config
}

mod config_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_created_with_defaults() -> TestResult {
        let dir = TempDir::new()?;
        let path = dir.path().join("etc/bmc-update/config.json");

        let config = ServiceConfig::load_from_path(&path).await?;

        assert!(path.is_file());
        assert_eq!(config, ServiceConfig::default());
        let reloaded = ServiceConfig::load_from_path(&path).await?;
        assert_eq!(reloaded, config);
        Ok(())
    }

    #[tokio::test]
    async fn test_unparseable_file_is_reported() -> TestResult {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, "{ not json").await?;

        let result = ServiceConfig::load_from_path(&path).await;
        let message = result.map_or_else(|e| format!("{e:#}"), |_| String::new());
        assert!(message.contains("Failed to parse config file"));
        Ok(())
    }
}

mod publisher_tests {
    use super::*;
    use bmc_firmware_update::{Activation, Version};

    fn object(version: &str) -> VersionObject {
        let entry = Version::new(
            version,
            VersionPurpose::Host,
            "/xyz/openbmc_project/software",
            "/tmp/images/upload",
        );
        let activation = Activation::new(
            entry.id.clone(),
            entry.path.clone(),
            VersionPurpose::Host,
            ActivationState::Ready,
            Vec::new(),
        );
        VersionObject {
            version: entry,
            activation,
            functional: false,
        }
    }

    #[test]
    fn test_snapshot_tracks_objects_and_associations() -> TestResult {
        let dir = TempDir::new()?;
        let path = dir.path().join("run/objects.json");
        let mut publisher = SnapshotPublisher::new(&path);

        let first = object("bios-1.0");
        let second = object("bios-2.0");
        publisher.publish_object(&first);
        publisher.publish_object(&second);
        publisher.publish_associations(&[Association::of_kind(
            RelationKind::Active,
            first.version.path.clone(),
        )]);
        publisher.withdraw_object(&second.version.id);

        let on_disk = SnapshotPublisher::load(&path)?;
        assert_eq!(&on_disk, publisher.snapshot());
        assert_eq!(on_disk.objects.len(), 1);
        assert!(on_disk.objects.contains_key(&first.version.id));
        assert_eq!(on_disk.associations.len(), 1);
        assert!(on_disk.generated_at.is_some());
        Ok(())
    }
}

mod socket_tests {
    use super::*;
    use serde_json::Value;
    use tokio::io::{Lines, ReadHalf};

    struct Client {
        lines: Lines<BufReader<ReadHalf<UnixStream>>>,
        writer: tokio::io::WriteHalf<UnixStream>,
    }

    impl Client {
        async fn connect(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
            for _ in 0..100 {
                if path.exists()
                    && let Ok(stream) = UnixStream::connect(path).await
                {
                    let (reader, writer) = tokio::io::split(stream);
                    return Ok(Self {
                        lines: BufReader::new(reader).lines(),
                        writer,
                    });
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err("socket never came up".into())
        }

        async fn call(&mut self, request: &str) -> Result<Value, Box<dyn std::error::Error>> {
            self.writer.write_all(request.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
            let line = self.lines.next_line().await?.ok_or("connection closed")?;
            Ok(serde_json::from_str(&line)?)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_host_image_activates_over_socket() -> TestResult {
        let dir = TempDir::new()?;
        let config = service_config(dir.path());
        let socket_path = config.socket_path.clone();
        let snapshot_path = config.snapshot_path.clone();

        let upload = config.updater.upload_dir.join("bios-upload");
        std::fs::create_dir_all(&upload)?;
        std::fs::write(upload.join("image-bios"), b"payload")?;

        let mut daemon = ServiceDaemon::start(config)?;
        let shutdown = daemon.shutdown_handle();
        let running = tokio::spawn(async move { daemon.run().await });

        let mut client = Client::connect(&socket_path).await?;

        let created = client
            .call(&format!(
                r#"{{"op":"create","purpose":"Host","version":"bios-7.1","file_path":{}}}"#,
                serde_json::to_string(&upload)?
            ))
            .await?;
        assert_eq!(created["status"], "ok");
        let id = VersionId::from_version("bios-7.1");
        assert_eq!(created["data"], id.as_str());

        let activating = client
            .call(&format!(r#"{{"op":"activate","id":"{id}"}}"#))
            .await?;
        assert_eq!(activating["data"], "Activating");

        let mut state = Value::Null;
        for _ in 0..100 {
            let object = client.call(&format!(r#"{{"op":"get","id":"{id}"}}"#)).await?;
            state = object["data"]["activation"]["state"].clone();
            if state == "Active" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(state, "Active");

        let listing = client.call(r#"{"op":"list"}"#).await?;
        assert_eq!(listing["data"]["field_mode"], false);
        assert!(
            listing["data"]["associations"]
                .as_array()
                .is_some_and(|a| a.iter().any(|x| x["forward"] == "functional"))
        );

        let garbage = client.call("not json").await?;
        assert_eq!(garbage["status"], "error");
        assert_eq!(garbage["kind"], "protocol");

        let missing = client.call(r#"{"op":"delete","id":"00000000"}"#).await?;
        assert_eq!(missing["kind"], "catalog_inconsistency");

        shutdown.send(())?;
        running.await??;

        assert!(!socket_path.exists());
        let snapshot = SnapshotPublisher::load(&snapshot_path)?;
        assert!(snapshot.objects.contains_key(&id));
        assert!(!upload.exists());
        Ok(())
    }
}
