//! Flash persistence of the last-value store.
//!
//! Uses the nRF52840's internal flash via the `sequential-storage` map
//! API: the whole store image lives under a single key, so a save is
//! one append and wear levelling / GC is handled by the crate.

use crate::config::{STORAGE_FLASH_PAGE_COUNT, STORAGE_FLASH_PAGE_START};
use crate::state_store::{LastValueStore, MAX_IMAGE_SIZE};
use defmt::{debug, error, info};

/// Flash page size for nRF52840 (4 KB).
const FLASH_PAGE_SIZE: u32 = 4096;

/// Start address of our storage region.
const STORAGE_START: u32 = STORAGE_FLASH_PAGE_START * FLASH_PAGE_SIZE;

/// End address (exclusive) of our storage region.
const STORAGE_END: u32 = (STORAGE_FLASH_PAGE_START + STORAGE_FLASH_PAGE_COUNT) * FLASH_PAGE_SIZE;

/// Map key of the last-value image.
const KEY_LAST_VALUES: u8 = 0x01;

/// Load the persisted image into `store`, replacing its contents.
pub async fn load(
    flash: &mut impl embedded_storage_async::nor_flash::NorFlash,
    store: &mut LastValueStore,
) {
    let mut buf = [0u8; MAX_IMAGE_SIZE];

    match sequential_storage::map::fetch_item::<u8, &[u8], _>(
        flash,
        STORAGE_START..STORAGE_END,
        &mut sequential_storage::cache::NoCache::new(),
        &mut buf,
        &KEY_LAST_VALUES,
    )
    .await
    {
        Ok(Some(data)) => {
            store.deserialize_all(data);
            info!("restored {} values from flash", store.iter().count());
        }
        Ok(None) => {
            info!("no stored values in flash");
        }
        Err(e) => {
            error!("flash read error: {:?}", defmt::Debug2Format(&e));
        }
    }
    store.mark_clean();
}

/// Persist the store image if it changed since the last save.
pub async fn save(
    flash: &mut impl embedded_storage_async::nor_flash::NorFlash,
    store: &mut LastValueStore,
) {
    if !store.is_dirty() {
        debug!("last-value store unchanged - skipping save");
        return;
    }

    let mut buf = [0u8; MAX_IMAGE_SIZE];
    let mut image = [0u8; MAX_IMAGE_SIZE];
    let len = store.serialize_all(&mut image);
    let item = &image[..len];

    match sequential_storage::map::store_item::<u8, &[u8], _>(
        flash,
        STORAGE_START..STORAGE_END,
        &mut sequential_storage::cache::NoCache::new(),
        &mut buf,
        &KEY_LAST_VALUES,
        &item,
    )
    .await
    {
        Ok(_) => {
            info!("saved {} values to flash", store.iter().count());
            store.mark_clean();
        }
        Err(e) => {
            error!("flash write error: {:?}", defmt::Debug2Format(&e));
        }
    }
}
