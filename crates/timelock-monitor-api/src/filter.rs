//! Installed-app catalog filtering

use timelock_api::AppMetadata;

const PLATFORM_PREFIXES: &[&str] = &["com.android.", "android."];

/// True for packages that belong to the platform rather than the user
pub fn is_platform_package(package_id: &str) -> bool {
    package_id == "android" || PLATFORM_PREFIXES.iter().any(|p| package_id.starts_with(p))
}

/// Apps a user may pick for control: named, non-platform, sorted by name
pub fn filter_user_apps(apps: Vec<AppMetadata>) -> Vec<AppMetadata> {
    let mut apps: Vec<AppMetadata> = apps
        .into_iter()
        .filter(|app| !app.display_name.trim().is_empty())
        .filter(|app| !app.package_id.is_blank())
        .filter(|app| !is_platform_package(app.package_id.as_str()))
        .collect();

    apps.sort_by(|a, b| {
        a.display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase())
            .then_with(|| a.package_id.cmp(&b.package_id))
    });
    apps.dedup_by(|a, b| a.package_id == b.package_id);
    apps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_platform_and_unnamed_apps() {
        let apps = vec![
            AppMetadata::new("com.whatsapp", "WhatsApp"),
            AppMetadata::new("com.android.chrome", "Chrome"),
            AppMetadata::new("android.auto_generated", "Generated"),
            AppMetadata::new("com.example.blank", "  "),
            AppMetadata::new("com.spotify.music", "Spotify"),
            AppMetadata::new("com.duolingo", "duolingo"),
        ];

        let filtered = filter_user_apps(apps);
        let names: Vec<&str> = filtered.iter().map(|a| a.display_name.as_str()).collect();
        assert_eq!(names, vec!["duolingo", "Spotify", "WhatsApp"]);
    }

    #[test]
    fn platform_package_detection() {
        assert!(is_platform_package("android"));
        assert!(is_platform_package("com.android.settings"));
        assert!(!is_platform_package("com.androidify.app"));
        assert!(!is_platform_package("com.google.android.youtube"));
    }
}
