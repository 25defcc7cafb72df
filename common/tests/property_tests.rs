// Property-based tests across watch list, schedule and config loading

use chrono::{Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use common::auth::generate_token;
use common::config::Settings;
use common::models::{EntityKey, WatchedEntity};
use common::schedule::CronTrigger;
use common::watchlist::WatchList;
use proptest::prelude::*;
use std::collections::HashSet;
use std::path::PathBuf;

proptest! {
    /// A tag flow with N URLs becomes N entities sharing one action
    #[test]
    fn property_tag_flow_fans_out_per_url(
        repos in prop::collection::hash_set("[a-z][a-z0-9]{2,10}", 1..6)
    ) {
        let urls: Vec<String> = repos
            .iter()
            .map(|r| format!("https://github.com/acme/{}", r))
            .collect();
        let quoted: Vec<String> = urls.iter().map(|u| format!("\"{}\"", u)).collect();
        let yaml = format!(
            "flux:\n  release:\n    urls: [{}]\n    watcher: \"* * * * *\"\n    regex: \"^v\"\n    init_repo: https://github.com/acme/deploy\n    path: /srv/release\n",
            quoted.join(", ")
        );

        let entities = WatchList::parse(&yaml).unwrap().into_entities();
        prop_assert_eq!(entities.len(), urls.len());

        let keys: HashSet<EntityKey> = entities.iter().map(WatchedEntity::key).collect();
        prop_assert_eq!(keys.len(), urls.len());
        for entity in &entities {
            prop_assert_eq!(&entity.action().destination, &PathBuf::from("/srv/release"));
            prop_assert_eq!(entity.action().source_url.as_str(), "https://github.com/acme/deploy");
        }
    }

    /// Repositories clone into a directory named after the repository
    #[test]
    fn property_repository_destination_uses_repo_name(
        name in "[a-z][a-z0-9-]{1,12}",
        dot_git in any::<bool>(),
    ) {
        let suffix = if dot_git { ".git" } else { "" };
        let yaml = format!(
            "repos:\n  svc:\n    url: https://github.com/acme/{}{}\n    watcher: \"* * * * *\"\n    path: /srv\n",
            name, suffix
        );

        let entities = WatchList::parse(&yaml).unwrap().into_entities();
        prop_assert_eq!(entities.len(), 1);
        prop_assert_eq!(&entities[0].action().destination, &PathBuf::from("/srv").join(&name));
    }

    /// The next fire time is strictly later and lands on a matching minute
    #[test]
    fn property_next_fire_is_after_reference(
        step in 1u32..30,
        offset_seconds in 0i64..(7 * 24 * 3600),
    ) {
        let trigger = CronTrigger::parse(&format!("*/{} * * * *", step), Tz::UTC).unwrap();
        let reference = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
            + Duration::seconds(offset_seconds);

        let next = trigger.next_after(reference).unwrap();
        prop_assert!(next > reference);
        prop_assert_eq!(next.second(), 0);
        prop_assert_eq!(next.minute() % step, 0);
        prop_assert!(next - reference <= Duration::hours(1));
    }

    /// Generated tokens are hex strings of twice the requested byte length
    #[test]
    fn property_generated_tokens_are_hex(bytes in 1usize..64) {
        let token = generate_token(bytes);
        prop_assert_eq!(token.len(), bytes * 2);
        prop_assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

#[test]
fn property_config_file_values_are_loaded() {
    proptest!(|(
        port in 1024u16..65535u16,
        max_tag_pages in 1u32..500u32,
        run_on_start in any::<bool>(),
    )| {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            format!(
                "[server]\nport = {}\n\n[github]\nmax_tag_pages = {}\n\n[watcher]\nrun_on_start = {}\n",
                port, max_tag_pages, run_on_start
            ),
        )
        .unwrap();

        let settings = Settings::load_from_path(dir.path()).unwrap();
        prop_assert_eq!(settings.server.port, port);
        prop_assert_eq!(settings.github.max_tag_pages, max_tag_pages);
        prop_assert_eq!(settings.watcher.run_on_start, run_on_start);
        prop_assert!(settings.validate().is_ok());
    });
}
