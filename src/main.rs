#![allow(non_snake_case)]
use RustedPolyprism::Examples::inversion_examples::inversion_examples;

fn main() {
    let example = 0;
    inversion_examples(example);
}
