//! Avatar Export CLI
//!
//! Merge an avatar pack into one model and write it as GLB, glTF or VRM.

use avatar_export::{
    export_with_config, load_avatar, read_container, AvatarNode, ExportConfig, ExportFormat,
    GltfContainer, Rgb,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "avatar-export")]
#[command(author, version, about = "Merge avatar parts into one atlas-textured model", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export an avatar pack
    Export {
        /// Path to avatar pack (ZIP or directory with avatar.json)
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "glb")]
        format: OutputFormat,

        /// Atlas size (power of two, 256 to 8192)
        #[arg(long, default_value = "4096")]
        atlas_size: u32,

        /// Largest size of a single part texture in the atlas
        #[arg(long, default_value = "1024")]
        max_texture_size: u32,

        /// Background color of transparent parts (#rrggbb)
        #[arg(long, value_parser = parse_color)]
        chroma_key: Option<Rgb>,

        /// RGB distance within which pixels match the chroma key
        #[arg(long, default_value = "0")]
        chroma_tolerance: f32,

        /// File name without extension
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Show information about an avatar pack or an exported file
    Info {
        /// Avatar pack, or a .glb / .vrm file
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Binary glTF
    Glb,
    /// glTF JSON with a separate .bin buffer
    Gltf,
    /// VRM humanoid avatar
    Vrm,
}

fn parse_color(s: &str) -> Result<Rgb, String> {
    s.parse()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Export {
            input,
            output,
            format,
            atlas_size,
            max_texture_size,
            chroma_key,
            chroma_tolerance,
            name,
        } => {
            let mut config = ExportConfig::default()
                .with_atlas_size(atlas_size)
                .with_max_texture_size(max_texture_size)
                .with_chroma_key(chroma_key.unwrap_or_default(), chroma_tolerance);
            config = match format {
                OutputFormat::Glb => config.with_format(ExportFormat::Generic),
                OutputFormat::Gltf => config
                    .with_format(ExportFormat::Generic)
                    .with_container(GltfContainer::Separate),
                OutputFormat::Vrm => config.with_format(ExportFormat::Avatar),
            };
            if let Some(name) = name {
                config = config.with_file_name(name);
            }
            export_pack(&input, &output, &config)?;
        }
        Commands::Info { input } => {
            show_info(&input)?;
        }
    }

    Ok(())
}

fn export_pack(
    input: &Path,
    output_dir: &Path,
    config: &ExportConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading avatar pack from {:?}...", input);
    let avatar = load_avatar(input)?;
    println!(
        "  Found {} nodes, {} parts",
        avatar.node_count(),
        avatar.parts().len()
    );

    println!("Exporting with config:");
    println!("  - Format: {}", config.format);
    println!("  - Atlas size: {}", config.atlas_size);
    println!("  - Max texture size: {}", config.max_texture_size);
    println!(
        "  - Chroma key: {} (tolerance {})",
        config.chroma_key, config.chroma_tolerance
    );

    let out = export_with_config(&avatar, config)?;

    fs::create_dir_all(output_dir)?;
    let path = output_dir.join(out.suggested_file_name());
    fs::write(&path, &out.bytes)?;
    println!(
        "Exported {} ({} bytes, {}) to {:?}",
        out.kind.extension().to_uppercase(),
        out.len(),
        out.mime_type(),
        path
    );

    if let (Some(sidecar), Some(sidecar_name)) = (&out.sidecar, out.sidecar_file_name()) {
        let sidecar_path = output_dir.join(sidecar_name);
        fs::write(&sidecar_path, sidecar)?;
        println!("  Buffer: {:?} ({} bytes)", sidecar_path, sidecar.len());
    }

    Ok(())
}

fn show_info(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let is_container = matches!(
        input.extension().and_then(|e| e.to_str()),
        Some("glb") | Some("vrm")
    );
    if is_container {
        show_container_info(input)
    } else {
        let avatar = load_avatar(input)?;
        show_avatar_info(&avatar);
        Ok(())
    }
}

fn show_avatar_info(avatar: &AvatarNode) {
    let parts = avatar.parts();

    println!("\nAvatar Pack Info:");
    println!("  Nodes: {}", avatar.node_count());
    println!("  Parts: {}", parts.len());
    for part in &parts {
        let mesh = &part.part.mesh;
        let texture = &part.part.material.base_color;
        println!(
            "    {}: {} vertices, {} triangles, {}x{} texture{}{}",
            part.name,
            mesh.vertex_count(),
            mesh.triangle_count(),
            texture.width,
            texture.height,
            if mesh.skin.is_some() { ", skinned" } else { "" },
            if part.part.material.transparent { ", transparent" } else { "" },
        );
    }

    let bones: BTreeSet<&str> = parts
        .iter()
        .filter_map(|p| p.part.mesh.skin.as_ref())
        .flat_map(|skin| skin.bones.iter().map(|b| b.name.as_str()))
        .collect();
    println!("  Distinct bones: {}", bones.len());

    let humanoids = avatar.humanoid_declarations();
    match humanoids.first() {
        Some((node, humanoid)) => {
            println!(
                "  Humanoid: declared on '{}' ({} bones mapped)",
                node,
                humanoid.bones.len()
            );
            if humanoids.len() > 1 {
                println!("    {} later declarations are ignored", humanoids.len() - 1);
            }
        }
        None => println!("  Humanoid: none (VRM export unavailable)"),
    }
}

fn show_container_info(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    let decoded = read_container(&data)?;

    println!("\nContainer Info:");
    println!("  Size: {} bytes (glTF version {})", data.len(), decoded.version);
    println!("  Nodes: {}", decoded.node_count());
    println!("  Meshes: {}", decoded.root.meshes.len());
    println!("  Materials: {}", decoded.root.materials.len());
    println!("  Accessors: {}", decoded.accessor_count());
    println!("  Buffer: {} bytes", decoded.buffer_len());
    println!("  Skins: {}", decoded.root.skins.len());
    for chunk in &decoded.extra_chunks {
        println!("  Extra chunk {} ({} bytes)", chunk.tag(), chunk.data.len());
    }
    if let Some(humanoid) = decoded.humanoid()? {
        println!("  Humanoid bones: {}", humanoid.human_bones.len());
    }

    Ok(())
}
