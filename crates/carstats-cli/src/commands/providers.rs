use carstats_core::Config;

pub fn run(config: &Config) {
    let fleet = super::make_fleet(config);
    let providers = if config.providers.is_empty() {
        carstats_core::demo_providers()
    } else {
        config.providers.clone()
    };

    println!("{} provider(s), highest priority first:", fleet.providers().len());
    println!();
    for (rank, provider) in providers.iter().enumerate() {
        let keys: Vec<&str> = provider.fields.iter().map(|f| f.key.as_str()).collect();
        println!(
            "  {:>2}. {}{}",
            rank + 1,
            provider.identity,
            if provider.needs_permissions {
                "  (needs permissions)"
            } else {
                ""
            }
        );
        println!("      fields: {}", keys.join(", "));
    }
}
