mod dex_builder;
