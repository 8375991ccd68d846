use rust_embed::RustEmbed;

/// SQL migrations compiled into the binary
#[derive(RustEmbed)]
#[folder = "src/database/migrations/"]
#[prefix = "migrations/"]
pub struct MigrationAssets;

impl MigrationAssets {
    /// Every embedded `.sql` file as `(name, sql)`, ordered by file name
    pub fn get_migrations() -> Vec<(String, String)> {
        let mut migrations: Vec<(String, String)> = Self::iter()
            .filter(|path| path.ends_with(".sql"))
            .filter_map(|path| {
                let file = Self::get(&path)?;
                let name = path.strip_prefix("migrations/").unwrap_or(&path).to_string();
                Some((name, String::from_utf8_lossy(&file.data).into_owned()))
            })
            .collect();

        migrations.sort_by(|a, b| a.0.cmp(&b.0));
        migrations
    }
}
