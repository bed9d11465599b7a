use std::{env, error::Error, process::ExitCode};

use dicom_volume_sync::{
    DicomStore, DicomTagDecoder, SyncConfig, VolumeLoader, tags::DataUnit,
    volume_loader::collect_dicom_paths,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::init();

    let mut args = env::args().skip(1);
    let Some(dir) = args.next() else {
        eprintln!("usage: dicom-volume-sync <dir> [namespace]");
        return ExitCode::FAILURE;
    };
    let namespace = args.next();

    match run(&dir, namespace.as_deref()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(dir: &str, namespace: Option<&str>) -> Result<(), Box<dyn Error>> {
    let config = match env::var("DICOM_VOLUME_SYNC_CONFIG") {
        Ok(path) => SyncConfig::from_path(path)?,
        Err(_) => SyncConfig::default(),
    };
    let mut store = DicomStore::new(DicomTagDecoder, VolumeLoader, config);

    let units: Vec<DataUnit> = collect_dicom_paths(dir)?
        .into_iter()
        .map(DataUnit::from_path)
        .collect();
    log::info!("found {} DICOM files in {dir}", units.len());

    let keys = store.import_units(units, namespace).await?;
    for key in &keys {
        match store.build_volume(key, false).await {
            Ok(volume) => log::info!("{key}: built {:?}", volume.dim()),
            Err(err) => log::error!("{key}: {err}"),
        }
    }

    println!("{}", serde_json::to_string_pretty(store.catalog())?);
    if let Some(record) = namespace.and_then(|namespace| store.bus().record(namespace)) {
        println!("{}", serde_json::to_string_pretty(record)?);
    }
    Ok(())
}
