use once_cell::sync::Lazy;
use std::env;

pub static STORAGE_BUCKET: Lazy<String> =
    Lazy::new(|| env::var("SUPABASE_BUCKET").unwrap_or_else(|_| "coin-images".to_string()));

pub static IMAGES_TABLE: Lazy<String> =
    Lazy::new(|| env::var("SUPABASE_IMAGES_TABLE").unwrap_or_else(|_| "coins".to_string()));

pub static IMAGES_COLUMN: Lazy<String> =
    Lazy::new(|| env::var("SUPABASE_IMAGES_COLUMN").unwrap_or_else(|_| "images".to_string()));
