//! Compile-time defaults, generated by build.rs from the library defaults
//! merged with an optional `DSP_CONFIG_RS` file.

include!(concat!(env!("OUT_DIR"), "/dsp_merged_config.rs"));
